pub mod json;

use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

/// Date string format shared by EXIF, XMP (after value conversion) and QuickTime tags.
pub const CANONICAL_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// A timestamp rendered as `YYYY:MM:DD HH:MM:SS` in local wall-clock time.
///
/// Only constructed from a validated epoch value, so the string always has the
/// fixed 19-character shape and the date part is always the first 10 bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalDate(String);

impl CanonicalDate {
    /// Normalize epoch seconds into local time. Returns `None` for zero or
    /// values outside the representable range.
    pub fn from_epoch_seconds(epoch: i64) -> Option<Self> {
        Self::from_epoch_seconds_in(epoch, &Local)
    }

    /// Same as [`CanonicalDate::from_epoch_seconds`] for an explicit time zone.
    pub fn from_epoch_seconds_in<Tz: TimeZone>(epoch: i64, tz: &Tz) -> Option<Self>
    where
        Tz::Offset: fmt::Display,
    {
        if epoch == 0 {
            return None;
        }
        let utc = DateTime::from_timestamp(epoch, 0)?;
        let local = utc.with_timezone(tz);
        let formatted = local.format(CANONICAL_FORMAT).to_string();
        // chrono pads years below 1000 but lets years past 9999 grow a fifth digit
        if formatted.len() != 19 {
            return None;
        }
        Some(Self(formatted))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `YYYY:MM:DD`, for tags that only store date granularity.
    pub fn date_part(&self) -> &str {
        &self.0[..10]
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalDate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
