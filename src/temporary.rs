// SPDX-License-Identifier: MIT
//! Temporary file and directory helpers
//!
//! Everything this crate hands to an external tool goes through here, so
//! that stray files left behind by a crashed run are recognizable by their
//! common prefix.

use std::io;

use tempfile::{Builder, NamedTempFile, TempDir, TempPath};

const PREFIX: &str = "djvu-assembler";

/// Create a named temporary file with the given suffix (e.g. `".djvu"`).
pub fn file(suffix: &str) -> io::Result<NamedTempFile> {
    Builder::new().prefix(PREFIX).suffix(suffix).tempfile()
}

/// Create an empty temporary file and return only its path.
///
/// The file is deleted when the returned `TempPath` is dropped. External
/// tools overwrite it in place.
pub fn path(suffix: &str) -> io::Result<TempPath> {
    Ok(file(suffix)?.into_temp_path())
}

/// Create a private temporary directory, removed recursively on drop.
pub fn directory() -> io::Result<TempDir> {
    Builder::new().prefix(PREFIX).tempdir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_has_suffix() {
        let tmp = file(".pbm").unwrap();
        let name = tmp.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(PREFIX));
        assert!(name.ends_with(".pbm"));
    }

    #[test]
    fn test_path_exists_until_drop() {
        let tmp = path(".djvu").unwrap();
        let location = tmp.to_path_buf();
        assert!(location.exists());
        drop(tmp);
        assert!(!location.exists());
    }

    #[test]
    fn test_directory_removed_on_drop() {
        let dir = directory().unwrap();
        let location = dir.path().to_path_buf();
        assert!(location.is_dir());
        drop(dir);
        assert!(!location.exists());
    }
}
