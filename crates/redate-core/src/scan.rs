use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One directory entry as handed to the batch driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub full_path: PathBuf,
}

/// List the regular files directly inside `folder`, sorted by name.
/// Entries whose names are not valid UTF-8 are skipped.
pub fn list_entries(folder: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        entries.push(Entry {
            name,
            full_path: entry.path(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(folder = %folder.display(), count = entries.len(), "Listed folder");
    Ok(entries)
}

/// Read a whole file as UTF-8 text.
pub fn read_text(path: &Path) -> io::Result<String> {
    fs::read_to_string(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_entries_files_only_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir(dir.path().join("working")).unwrap();

        let entries = list_entries(dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.jpg", "b.jpg"]);
        assert_eq!(entries[0].full_path, dir.path().join("a.jpg"));
    }

    #[test]
    fn test_list_missing_folder_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_entries(&dir.path().join("nope")).is_err());
    }
}
