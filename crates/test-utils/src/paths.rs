//! Temporary locations for cutout files written by tests.

use std::path::{Path, PathBuf};

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Path of a cutout file named `name` inside `dir`.
pub fn cutout_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.cutout.gz", name))
}

/// Files currently in `dir`, sorted by name.
///
/// Used to check that no staged temp files are left behind.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_is_cleaned_up() {
        let path = {
            let dir = temp_test_dir();
            assert!(dir.path().is_dir());
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_list_files() {
        let dir = temp_test_dir();
        std::fs::write(cutout_path(dir.path(), "b"), b"").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        assert_eq!(list_files(dir.path()), vec!["a.txt", "b.cutout.gz"]);
    }
}
