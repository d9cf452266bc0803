use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::extras::{self, nfc};
use crate::scan::{self, Entry};

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+\)\.").unwrap());
static TRAILING_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+\)$").unwrap());
static EXTRA_REGEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<extra>-[A-Za-zÀ-ÖØ-öø-ÿ]+(\(\d\))?)\.\w+$").unwrap());
static DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d\)\.").unwrap());

/// Sidecar keys whose nested `timestamp` holds the capture time, in priority order.
pub const TIMESTAMP_KEYS: &[&str] = &["photoTakenTime"];

/// Newer exports name sidecars `<media>.supplemental-metadata.json`, truncated to fit 51 chars.
const SUPPLEMENTAL_SUFFIX: &str = "supplemental-metadata";

/// Google caps `<media>.json` at 51 characters.
const MAX_SIDECAR_NAME_LEN: usize = 51;

/// Extract the capture epoch from a parsed sidecar.
/// Google stores it as a string, but plain numbers are accepted too.
/// Missing, zero and non-numeric values all yield `None`.
pub fn photo_taken_time(data: &Value) -> Option<i64> {
    TIMESTAMP_KEYS.iter().find_map(|key| {
        let raw = data.get(key)?.get("timestamp")?;
        let epoch = match raw {
            Value::String(s) => parse_epoch(s.trim())?,
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))?,
            _ => return None,
        };
        (epoch != 0).then_some(epoch)
    })
}

/// Epoch seconds from text, truncating any fractional part.
pub fn parse_epoch(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    f.is_finite().then(|| f.trunc() as i64)
}

/// Read and parse a sidecar. Failures are logged and reported as "unavailable".
pub fn read_sidecar(path: &Path) -> Option<Value> {
    let text = match scan::read_text(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(path = %path.display(), "Error reading JSON: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(path = %path.display(), "Error parsing JSON: {}", e);
            None
        }
    }
}

/// Capture epoch for a sidecar file, if it is readable and carries one.
pub fn timestamp_from_sidecar(path: &Path) -> Option<i64> {
    read_sidecar(path).as_ref().and_then(photo_taken_time)
}

/// Sidecars of one folder, keyed by the media filename they describe.
#[derive(Debug, Default)]
pub struct SidecarIndex {
    by_media_name: HashMap<String, PathBuf>,
}

impl SidecarIndex {
    pub fn build(entries: &[Entry]) -> Self {
        let mut by_media_name = HashMap::new();
        for entry in entries {
            if let Some(key) = media_key(&entry.name) {
                // a plain `<media>.json` wins over a supplemental variant
                by_media_name
                    .entry(key)
                    .and_modify(|existing: &mut PathBuf| {
                        if is_plain_sidecar(&entry.name) {
                            *existing = entry.full_path.clone();
                        }
                    })
                    .or_insert_with(|| entry.full_path.clone());
            }
        }
        Self { by_media_name }
    }

    pub fn len(&self) -> usize {
        self.by_media_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_media_name.is_empty()
    }

    /// Try the filename transformations Google applies when naming sidecars.
    pub fn find(&self, filename: &str) -> Option<&Path> {
        let methods: [fn(&str) -> String; 7] = [
            |s: &str| s.to_string(),
            shorten_name,
            bracket_swap,
            extras::remove_extra,
            no_extension,
            remove_extra_regex,
            remove_digit,
        ];
        methods.iter().find_map(|method| {
            let key = nfc(&method(filename));
            self.by_media_name.get(&key).map(PathBuf::as_path)
        })
    }
}

/// Map a sidecar filename back to the media name it belongs to.
fn media_key(json_name: &str) -> Option<String> {
    let stem = json_name.strip_suffix(".json")?;
    if stem.is_empty() {
        return None;
    }
    // `<media>.supplemental-metadata(1).json` describes `<media>(1)`
    let (stem, bracket) = match TRAILING_BRACKET_RE.find(stem) {
        Some(m) => (&stem[..m.start()], m.as_str()),
        None => (stem, ""),
    };
    let stem = strip_supplemental(stem);
    if stem.is_empty() {
        return None;
    }
    Some(nfc(&format!("{}{}", stem, bracket)))
}

fn strip_supplemental(stem: &str) -> &str {
    if let Some(pos) = stem.rfind('.') {
        let tail = &stem[pos + 1..];
        if !tail.is_empty() && SUPPLEMENTAL_SUFFIX.starts_with(tail) {
            return &stem[..pos];
        }
    }
    stem
}

fn is_plain_sidecar(json_name: &str) -> bool {
    json_name
        .strip_suffix(".json")
        .map_or(false, |stem| strip_supplemental(stem) == stem)
}

fn shorten_name(filename: &str) -> String {
    let max_len = MAX_SIDECAR_NAME_LEN - ".json".len();
    if filename.len() + ".json".len() > MAX_SIDECAR_NAME_LEN {
        let mut end = max_len;
        while end > 0 && !filename.is_char_boundary(end) {
            end -= 1;
        }
        filename[..end].to_string()
    } else {
        filename.to_string()
    }
}

/// `IMG(1).jpg` has its sidecar at `IMG.jpg(1).json`.
fn bracket_swap(filename: &str) -> String {
    if let Some(m) = BRACKET_RE.find_iter(filename).last() {
        let bracket = m.as_str().replace('.', "");
        if let Some(pos) = filename.rfind(&bracket) {
            let mut result = String::with_capacity(filename.len());
            result.push_str(&filename[..pos]);
            result.push_str(&filename[pos + bracket.len()..]);
            result.push_str(&bracket);
            return result;
        }
    }
    filename.to_string()
}

fn no_extension(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

fn remove_extra_regex(filename: &str) -> String {
    if EXTRA_REGEX_RE.find_iter(filename).count() == 1 {
        if let Some(extra) = EXTRA_REGEX_RE.captures(filename).and_then(|c| c.name("extra")) {
            let mut result = filename.to_string();
            result.replace_range(extra.start()..extra.end(), "");
            return result;
        }
    }
    filename.to_string()
}

fn remove_digit(filename: &str) -> String {
    DIGIT_RE.replace_all(filename, ".").to_string()
}
