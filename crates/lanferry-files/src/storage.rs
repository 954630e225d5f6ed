//! Receive-folder management.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Name prefix of in-flight temp files the transfer engine keeps next to
/// received files. Listing and clearing skip them.
pub const STAGING_PREFIX: &str = ".lanferry-";

fn is_staging(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with(STAGING_PREFIX))
}

/// A file sitting in the receive folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Full path
    pub path: PathBuf,
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if the platform reports one
    pub modified: Option<SystemTime>,
}

/// Create the receive folder (and parents) if it does not exist.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// List regular files in `dir`, sorted by name.
///
/// Subdirectories, staging files and entries whose names are not UTF-8 are
/// skipped.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_received(dir: &Path) -> io::Result<Vec<ReceivedFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if is_staging(&entry.file_name()) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        files.push(ReceivedFile {
            path: entry.path(),
            name,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Delete every regular file in `dir`, returning how many were removed.
///
/// Subdirectories and staging files of a transfer in progress are left
/// alone.
///
/// # Errors
///
/// Returns the first error hit while reading the directory or removing a
/// file; files removed before the error stay removed.
pub fn clear_received(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if is_staging(&entry.file_name()) || !entry.file_type()?.is_file() {
            continue;
        }
        fs::remove_file(entry.path())?;
        tracing::debug!(path = %entry.path().display(), "removed received file");
        removed += 1;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_sorted_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let files = list_received(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(files[0].size, 1);
        assert_eq!(files[1].size, 2);
        assert_eq!(files[0].path, dir.path().join("a.txt"));
    }

    #[test]
    fn test_clear_removes_files_keeps_dirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"1").unwrap();
        fs::write(dir.path().join("b"), b"2").unwrap();
        fs::create_dir(dir.path().join("keep")).unwrap();

        assert_eq!(clear_received(dir.path()).unwrap(), 2);
        assert!(list_received(dir.path()).unwrap().is_empty());
        assert!(dir.path().join("keep").is_dir());
        assert_eq!(clear_received(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_staging_files_are_not_received_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("done.txt"), b"ok").unwrap();
        let staged = dir.path().join(".lanferry-4fQz.part");
        fs::write(&staged, b"half").unwrap();

        let names: Vec<_> = list_received(dir.path())
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["done.txt"]);

        assert_eq!(clear_received(dir.path()).unwrap(), 1);
        assert!(staged.exists());
    }

    #[test]
    fn test_ensure_dir_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("x/y/z");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(list_received(&dir.path().join("missing")).is_err());
    }
}
