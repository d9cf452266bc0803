use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Copy `source` over `destination` through a sibling temp file, so a reader
/// never sees a half-written destination.
pub fn copy_replace(source: &Path, destination: &Path) -> io::Result<()> {
    let temp = temp_path_for(destination, "tmpcopy");
    let result = fs::copy(source, &temp).and_then(|_| fs::rename(&temp, destination));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Move `source` to `destination`, replacing whatever is there.
/// Falls back to copy + delete when a plain rename is refused (e.g. across devices).
pub fn move_replace(source: &Path, destination: &Path) -> io::Result<()> {
    if source == destination {
        return Ok(());
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            tracing::debug!(
                from = %source.display(),
                to = %destination.display(),
                "rename failed ({}), falling back to copy",
                rename_error
            );
            copy_replace(source, destination)?;
            fs::remove_file(source)
        }
    }
}

fn temp_path_for(destination: &Path, tag: &str) -> PathBuf {
    let mut temp = destination.to_path_buf();
    let ext = destination
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("");
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let temp_ext = if ext.is_empty() {
        format!("{}_{}", tag, suffix)
    } else {
        format!("{}.{}_{}", ext, tag, suffix)
    };
    temp.set_extension(temp_ext);
    temp
}
