//! Utilities pertaining to filesystem and other os-level settings
//!

use camino::Utf8Path;
use log::debug;

/// Create a novel directory path if it does not exist already
///
/// If the directory already exists no operations are performed
///
/// * `label` - used to describe the error directory in an error message
///
pub fn create_dir_all(dir: &Utf8Path, label: &str) {
    if !dir.is_dir() {
        match std::fs::create_dir_all(dir) {
            Ok(_) => {}
            Err(e) => {
                panic!("Can't create new {} directory at '{}': {}", label, dir, e);
            }
        }
    }
}

/// Remove a regular file if it exists
///
/// Returns true if a file was removed. Missing files and non-file paths are left alone, so
/// repeated calls are harmless.
///
pub fn remove_file_if_present(path: &Utf8Path) -> std::io::Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    match std::fs::remove_file(path) {
        Ok(_) => {
            debug!("Removed file '{path}'");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::utf8_temp_dir;

    #[test]
    fn test_remove_file_if_present() {
        let (_guard, dir) = utf8_temp_dir();
        let path = dir.join("x.txt");
        std::fs::write(&path, "x").unwrap();

        assert!(remove_file_if_present(&path).unwrap());
        assert!(!path.exists());
        assert!(!remove_file_if_present(&path).unwrap());

        // Directories are never removed
        assert!(!remove_file_if_present(&dir).unwrap());
        assert!(dir.is_dir());
    }
}
