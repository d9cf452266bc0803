use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::date::CanonicalDate;
use crate::engine::{MetadataEngine, TagMap};
use crate::error::EngineError;

/// A tag location consulted when deciding whether a file already carries a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckedField {
    /// EXIF original capture time
    DateTimeOriginal,
    /// EXIF digitized time, or the QuickTime creation time for movies
    CreateDate,
    /// XMP creation time
    XmpCreateDate,
    /// IPTC date without time of day
    DateCreated,
}

impl CheckedField {
    pub const ALL: [CheckedField; 4] = [
        CheckedField::DateTimeOriginal,
        CheckedField::CreateDate,
        CheckedField::XmpCreateDate,
        CheckedField::DateCreated,
    ];

    /// Keys this field may appear under in a [`TagMap`].
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            CheckedField::DateTimeOriginal => &["ExifIFD:DateTimeOriginal"],
            CheckedField::CreateDate => &["ExifIFD:CreateDate", "QuickTime:CreateDate"],
            CheckedField::XmpCreateDate => &["XMP-xmp:CreateDate"],
            CheckedField::DateCreated => &["IPTC:DateCreated"],
        }
    }

    fn expected<'a>(&self, date: &'a CanonicalDate) -> &'a str {
        match self {
            CheckedField::DateCreated => date.date_part(),
            _ => date.as_str(),
        }
    }

    fn matches(&self, tags: &TagMap, date: &CanonicalDate) -> bool {
        let expected = self.expected(date);
        self.keys()
            .iter()
            .filter_map(|key| tags.raw_str(key))
            .any(|value| value == expected)
    }
}

impl fmt::Display for CheckedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckedField::DateTimeOriginal => "DateTimeOriginal",
            CheckedField::CreateDate => "CreateDate",
            CheckedField::XmpCreateDate => "XMP-xmp:CreateDate",
            CheckedField::DateCreated => "DateCreated",
        };
        f.write_str(name)
    }
}

/// Result of comparing a file's tags against the expected date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    /// Every checked field that carries the expected value
    pub matched: Vec<CheckedField>,
    /// First date-time value found, for diagnostics
    pub actual: Option<String>,
}

impl Verification {
    /// Any single surviving field is enough.
    pub fn is_match(&self) -> bool {
        !self.matched.is_empty()
    }

    /// Every checked location carries the date.
    pub fn is_complete(&self) -> bool {
        self.matched.len() == CheckedField::ALL.len()
    }
}

/// Compare already-read tags against `expected`.
pub fn check_tags(expected: &CanonicalDate, tags: &TagMap) -> Verification {
    let matched = CheckedField::ALL
        .iter()
        .copied()
        .filter(|field| field.matches(tags, expected))
        .collect();
    let actual = [
        CheckedField::DateTimeOriginal,
        CheckedField::CreateDate,
        CheckedField::XmpCreateDate,
    ]
    .iter()
    .flat_map(|field| field.keys())
    .find_map(|key| tags.raw_str(key));
    Verification { matched, actual }
}

/// Re-read `path` and compare it against `expected`.
pub fn check(
    engine: &(impl MetadataEngine + ?Sized),
    expected: &CanonicalDate,
    path: &Path,
) -> Result<Verification, EngineError> {
    let tags = engine.read(path)?;
    Ok(check_tags(expected, &tags))
}

/// Whether `path` carries `expected` in at least one checked field.
pub fn verify(
    engine: &(impl MetadataEngine + ?Sized),
    expected: &CanonicalDate,
    path: &Path,
) -> Result<bool, EngineError> {
    Ok(check(engine, expected, path)?.is_match())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use chrono::Utc;

    fn new_year() -> CanonicalDate {
        CanonicalDate::from_epoch_seconds_in(1609459200, &Utc).unwrap()
    }

    #[test]
    fn test_no_tags_no_match() {
        let v = check_tags(&new_year(), &TagMap::new());
        assert!(!v.is_match());
        assert!(v.actual.is_none());
    }

    #[test]
    fn test_xmp_only_is_enough() {
        let mut tags = TagMap::new();
        tags.insert("ExifIFD:DateTimeOriginal", "2019:05:05 10:00:00");
        tags.insert("XMP-xmp:CreateDate", "2021:01:01 00:00:00");
        let v = check_tags(&new_year(), &tags);
        assert!(v.is_match());
        assert!(!v.is_complete());
        assert_eq!(v.matched, vec![CheckedField::XmpCreateDate]);
        assert_eq!(v.actual.as_deref(), Some("2019:05:05 10:00:00"));
    }

    #[test]
    fn test_date_only_compares_date_part() {
        let mut tags = TagMap::new();
        tags.insert("IPTC:DateCreated", "2021:01:01");
        assert_eq!(check_tags(&new_year(), &tags).matched, vec![CheckedField::DateCreated]);

        let mut tags = TagMap::new();
        tags.insert("IPTC:DateCreated", "2021:01:02");
        assert!(!check_tags(&new_year(), &tags).is_match());
    }

    #[test]
    fn test_quicktime_create_date() {
        let mut tags = TagMap::new();
        tags.insert("QuickTime:CreateDate", "2021:01:01 00:00:00");
        assert_eq!(check_tags(&new_year(), &tags).matched, vec![CheckedField::CreateDate]);
    }

    #[test]
    fn test_all_fields() {
        let mut tags = TagMap::new();
        tags.insert("ExifIFD:DateTimeOriginal", "2021:01:01 00:00:00");
        tags.insert("ExifIFD:CreateDate", "2021:01:01 00:00:00");
        tags.insert("XMP-xmp:CreateDate", "2021:01:01 00:00:00");
        tags.insert("IPTC:DateCreated", "2021:01:01");
        assert!(check_tags(&new_year(), &tags).is_complete());
    }

    #[test]
    fn test_verify_reads_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_1.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let engine = MemoryEngine::new();
        let mut tags = TagMap::new();
        tags.insert("ExifIFD:DateTimeOriginal", "2021:01:01 00:00:00");
        engine.seed(&path, tags);

        assert!(verify(&engine, &new_year(), &path).unwrap());
        assert!(verify(&engine, &new_year(), &dir.path().join("missing.jpg")).is_err());
    }
}
