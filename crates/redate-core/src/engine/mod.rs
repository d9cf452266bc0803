//! Access to embedded file metadata through an external editing engine.
//!
//! The engine is a single long-lived service: construct it once at startup,
//! share it by reference with every repair, and shut it down once at exit.

pub mod exiftool;
#[cfg(test)]
pub(crate) mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::date::CanonicalDate;
use crate::error::EngineError;

pub use exiftool::ExifTool;

/// Tags that receive the canonical date on every write, across all namespaces.
pub const DATE_TAGS: &[&str] = &[
    "EXIF:DateTimeOriginal",
    "EXIF:CreateDate",
    "EXIF:ModifyDate",
    "XMP-dc:Date",
    "XMP-photoshop:DateCreated",
    "XMP-xmp:CreateDate",
    "XMP-xmp:ModifyDate",
    "IPTC:DateCreated",
    "IPTC:DigitalCreateDate",
    "QuickTime:CreateDate",
    "QuickTime:CreationDate",
    "QuickTime:ModifyDate",
];

/// Read/write access to a file's embedded metadata.
///
/// Implementations must accept concurrent calls; callers never issue two
/// concurrent calls for the same path.
pub trait MetadataEngine: Send + Sync {
    /// All tags of `path`, keyed by `Group:Tag`.
    fn read(&self, path: &Path) -> Result<TagMap, EngineError>;

    /// Write every tag of `tags` into `path` in place.
    fn write(&self, path: &Path, tags: &TagSet) -> Result<(), EngineError>;
}

/// Tag values as returned by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagMap(BTreeMap<String, Value>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// The value rendered as the engine printed it, without JSON quoting.
    pub fn raw_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for TagMap {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

/// One write intent: every field in [`DATE_TAGS`] set to the same date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    fields: &'static [&'static str],
    value: CanonicalDate,
}

impl TagSet {
    pub fn for_date(date: &CanonicalDate) -> Self {
        Self {
            fields: DATE_TAGS,
            value: date.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.fields.iter().map(move |f| (*f, self.value.as_str()))
    }
}

/// Write failures known to leave the other tags intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenignWriteFailure {
    /// GPS IFD present but unreadable
    MissingGpsData,
    /// Broken embedded preview pointer in IFD0
    OtherImageStart,
}

impl fmt::Display for BenignWriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenignWriteFailure::MissingGpsData => f.write_str("missing GPS data"),
            BenignWriteFailure::OtherImageStart => f.write_str("OtherImageStart data in IFD0"),
        }
    }
}

/// Engine messages that downgrade a write failure to a warning.
/// The engine reports no error codes, so entries match on decoded message text.
pub const BENIGN_WRITE_FAILURES: &[(&str, BenignWriteFailure)] = &[
    ("Can't read GPS data", BenignWriteFailure::MissingGpsData),
    ("rror reading OtherImageStart data in IFD0", BenignWriteFailure::OtherImageStart),
];

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&#(\d+);").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    Benign(BenignWriteFailure),
    Fatal,
}

impl WriteFailure {
    pub fn classify(message: &str) -> Self {
        let decoded = decode_entities(message);
        BENIGN_WRITE_FAILURES
            .iter()
            .find(|(needle, _)| decoded.contains(needle))
            .map_or(WriteFailure::Fatal, |(_, kind)| WriteFailure::Benign(*kind))
    }

    /// Only write rejections can be benign; timeouts and crashes never are.
    pub fn of(error: &EngineError) -> Self {
        match error {
            EngineError::Write { message, .. } => Self::classify(message),
            _ => WriteFailure::Fatal,
        }
    }
}

/// Replace numeric HTML entities (`&#39;`) the engine uses in error text.
pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_tag_set_uses_one_value() {
        let date = CanonicalDate::from_epoch_seconds_in(1609459200, &chrono::Utc).unwrap();
        let tags = TagSet::for_date(&date);
        assert_eq!(tags.len(), 12);
        assert!(tags.iter().all(|(_, v)| v == "2021:01:01 00:00:00"));
        assert!(tags.iter().any(|(f, _)| f == "XMP-xmp:CreateDate"));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Can&#39;t read GPS data"), "Can't read GPS data");
        assert_eq!(decode_entities("plain"), "plain");
        assert_eq!(decode_entities("bad &#99999999; code"), "bad &#99999999; code");
    }

    #[test]
    fn test_classify_write_failures() {
        assert_eq!(
            WriteFailure::classify("Error: Can&#39;t read GPS data - /w/IMG_1.jpg"),
            WriteFailure::Benign(BenignWriteFailure::MissingGpsData)
        );
        assert_eq!(
            WriteFailure::classify("Error: Error reading OtherImageStart data in IFD0 - x.jpg"),
            WriteFailure::Benign(BenignWriteFailure::OtherImageStart)
        );
        assert_eq!(WriteFailure::classify("Error: Not a valid JPG"), WriteFailure::Fatal);

        let timeout = EngineError::Timeout(std::time::Duration::from_secs(1));
        assert_eq!(WriteFailure::of(&timeout), WriteFailure::Fatal);
        let write = EngineError::Write {
            path: PathBuf::from("x.jpg"),
            message: "Can't read GPS data".into(),
        };
        assert!(matches!(WriteFailure::of(&write), WriteFailure::Benign(_)));
    }

    #[test]
    fn test_raw_str() {
        let mut tags = TagMap::new();
        tags.insert("ExifIFD:DateTimeOriginal", "2021:01:01 00:00:00");
        tags.insert("File:FileSize", 1234);
        tags.insert("XMP-xmp:Rating", Value::Null);
        assert_eq!(tags.raw_str("ExifIFD:DateTimeOriginal").unwrap(), "2021:01:01 00:00:00");
        assert_eq!(tags.raw_str("File:FileSize").unwrap(), "1234");
        assert!(tags.raw_str("XMP-xmp:Rating").is_none());
        assert!(tags.raw_str("IPTC:DateCreated").is_none());
    }
}
