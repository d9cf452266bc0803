use std::path::{Path, PathBuf};

use crate::error::StageError;

/// The file under repair. Never mutated; only its working copy is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute (or caller-supplied) path of the original
    pub path: PathBuf,
    /// Just the filename, reused verbatim in every stage folder
    pub filename: String,
}

impl SourceFile {
    pub fn new(path: &Path) -> Result<Self, StageError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StageError::MissingFileName(path.to_path_buf()))?
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            filename,
        })
    }
}

/// Whether a file looks like a photo or video worth repairing.
pub fn is_media_file(filename: &str) -> bool {
    mime_guess::from_path(filename).iter().any(|mime| {
        mime.type_() == mime_guess::mime::IMAGE || mime.type_() == mime_guess::mime::VIDEO
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_name() {
        let source = SourceFile::new(Path::new("/photos/IMG_1.jpg")).unwrap();
        assert_eq!(source.filename, "IMG_1.jpg");
        assert!(SourceFile::new(Path::new("/")).is_err());
    }

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file("IMG_1.jpg"));
        assert!(is_media_file("IMG_1.PNG"));
        assert!(is_media_file("VID_1.mp4"));
        assert!(is_media_file("VID_1.mov"));
        assert!(!is_media_file("IMG_1.jpg.json"));
        assert!(!is_media_file("notes.txt"));
    }
}
