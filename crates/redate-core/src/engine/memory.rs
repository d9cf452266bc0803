use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::{MetadataEngine, TagMap, TagSet};
use crate::error::EngineError;

/// Separates the file body from the tag payload the fake embeds after it.
const TAGS_MARKER: &[u8] = b"\n--embedded-tags--\n";

/// Engine fake that embeds tags in the file it edits, so copies and moves
/// carry them the way real metadata travels with a file.
/// Tags are stored under the names exiftool reports on read.
#[derive(Default)]
pub struct MemoryEngine {
    write_error: Mutex<Option<String>>,
    /// Tags (write names) the engine silently refuses to store
    dropped: Mutex<Vec<&'static str>>,
    read_fails: Mutex<bool>,
    pub writes: AtomicUsize,
    pub reads: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed tags (read names) into the existing file at `path`.
    pub fn seed(&self, path: &Path, tags: TagMap) {
        let (body, mut stored) = load(path).unwrap();
        stored.0.extend(tags.0);
        store(path, &body, &stored).unwrap();
    }

    pub fn fail_writes_with(&self, message: &str) {
        *self.write_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn drop_tags(&self, tags: &[&'static str]) {
        self.dropped.lock().unwrap().extend_from_slice(tags);
    }

    pub fn fail_reads(&self) {
        *self.read_fails.lock().unwrap() = true;
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn load(path: &Path) -> Result<(Vec<u8>, TagMap), EngineError> {
    let bytes = fs::read(path)?;
    let split = bytes
        .windows(TAGS_MARKER.len())
        .rposition(|window| window == TAGS_MARKER);
    let Some(at) = split else {
        return Ok((bytes, TagMap::new()));
    };
    let tags: Map<String, Value> =
        serde_json::from_slice(&bytes[at + TAGS_MARKER.len()..]).map_err(|e| EngineError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    Ok((bytes[..at].to_vec(), TagMap::from(tags)))
}

fn store(path: &Path, body: &[u8], tags: &TagMap) -> Result<(), EngineError> {
    let mut bytes = body.to_vec();
    if !tags.is_empty() {
        bytes.extend_from_slice(TAGS_MARKER);
        let payload = serde_json::to_vec(&tags.0).map_err(|e| EngineError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        bytes.extend_from_slice(&payload);
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// exiftool reports EXIF dates under their IFD and stores IPTC DateCreated without time.
fn read_name(write_name: &str) -> String {
    match write_name {
        "EXIF:DateTimeOriginal" => "ExifIFD:DateTimeOriginal".to_string(),
        "EXIF:CreateDate" => "ExifIFD:CreateDate".to_string(),
        "EXIF:ModifyDate" => "IFD0:ModifyDate".to_string(),
        other => other.to_string(),
    }
}

impl MetadataEngine for MemoryEngine {
    fn read(&self, path: &Path) -> Result<TagMap, EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if *self.read_fails.lock().unwrap() || !path.exists() {
            return Err(EngineError::Read {
                path: path.to_path_buf(),
                message: "File not found".into(),
            });
        }
        Ok(load(path)?.1)
    }

    fn write(&self, path: &Path, tags: &TagSet) -> Result<(), EngineError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let dropped = self.dropped.lock().unwrap().clone();
        let (body, mut stored) = load(path)?;
        for (field, value) in tags.iter() {
            if dropped.contains(&field) {
                continue;
            }
            let value = if field == "IPTC:DateCreated" {
                &value[..10]
            } else {
                value
            };
            stored.insert(read_name(field), value);
        }
        store(path, &body, &stored)?;
        match self.write_error.lock().unwrap().clone() {
            Some(message) => Err(EngineError::Write {
                path: PathBuf::from(path),
                message,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::CanonicalDate;

    #[test]
    fn test_tags_travel_with_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("IMG_1.jpg");
        fs::write(&original, b"jpeg bytes").unwrap();
        let copy = dir.path().join("copy.jpg");
        fs::copy(&original, &copy).unwrap();

        let engine = MemoryEngine::new();
        let date = CanonicalDate::from_epoch_seconds_in(1609459200, &chrono::Utc).unwrap();
        engine.write(&copy, &TagSet::for_date(&date)).unwrap();

        assert!(engine.read(&original).unwrap().is_empty());
        let tags = engine.read(&copy).unwrap();
        assert_eq!(tags.raw_str("ExifIFD:DateTimeOriginal").unwrap(), "2021:01:01 00:00:00");
        assert_eq!(tags.raw_str("IPTC:DateCreated").unwrap(), "2021:01:01");
        assert_eq!(load(&copy).unwrap().0, b"jpeg bytes");
    }
}
