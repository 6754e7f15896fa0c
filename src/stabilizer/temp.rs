//! Temp files in the private cache directory.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// A file that is deleted when dropped.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Create `<dir>/<prefix>_<millis>.<extension>`.
    ///
    /// The millisecond stamp is bumped until the name is free, so two files
    /// created in the same millisecond never share a path.
    pub fn create(dir: &Path, prefix: &str, extension: &str) -> io::Result<Self> {
        let mut stamp = chrono::Utc::now().timestamp_millis();
        loop {
            let path = dir.join(format!("{}_{}.{}", prefix, stamp, extension));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Missing files count as removed.
    pub fn remove(mut self) -> io::Result<()> {
        let path = std::mem::take(&mut self.path);
        remove_if_present(&path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            log::warn!("Failed to delete temp file {}: {}", self.path.display(), e);
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_names_and_drop_removes() {
        let dir = TempDir::new().unwrap();
        let path = {
            let file = TempFile::create(dir.path(), "input", "mp4").unwrap();
            let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("input_"));
            assert!(name.ends_with(".mp4"));
            assert!(file.path().exists());
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_same_millisecond_gets_distinct_paths() {
        let dir = TempDir::new().unwrap();
        let a = TempFile::create(dir.path(), "stab", "mp4").unwrap();
        let b = TempFile::create(dir.path(), "stab", "mp4").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_remove_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let file = TempFile::create(dir.path(), "input", "mp4").unwrap();
        std::fs::remove_file(file.path()).unwrap();
        assert!(file.remove().is_ok());
    }
}
