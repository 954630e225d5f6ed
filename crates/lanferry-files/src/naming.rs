//! Naming of received files.
//!
//! Announced names come from the peer, so they are validated down to a
//! single plain path component before they touch the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted file name, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Reasons a file name is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Name is empty
    #[error("file name is empty")]
    Empty,

    /// Name contains a NUL byte
    #[error("file name contains a NUL byte")]
    NullByte,

    /// Name contains a line break, which would corrupt the wire framing
    #[error("file name contains a line break")]
    LineBreak,

    /// Name contains a path separator
    #[error("file name contains a path separator")]
    Separator,

    /// Name is `.` or `..`
    #[error("file name refers to a directory")]
    DotName,

    /// Name exceeds [`MAX_NAME_LEN`]
    #[error("file name is {0} bytes, limit is {MAX_NAME_LEN}")]
    TooLong(usize),

    /// Path has no UTF-8 final component
    #[error("path has no usable file name")]
    NotUtf8,

    /// Name collides with a protocol token
    #[error("file name '{0}' is reserved")]
    Reserved(&'static str),
}

/// Check that `name` is a single safe path component.
///
/// # Errors
///
/// Returns the first [`NameError`] the name violates.
pub fn validate_file_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong(name.len()));
    }
    if name.contains('\0') {
        return Err(NameError::NullByte);
    }
    if name.contains(['\n', '\r']) {
        return Err(NameError::LineBreak);
    }
    if name.contains(['/', '\\']) {
        return Err(NameError::Separator);
    }
    if name == "." || name == ".." {
        return Err(NameError::DotName);
    }
    Ok(())
}

/// Final component of `path` as a validated name.
///
/// # Errors
///
/// Returns [`NameError::NotUtf8`] if the path has no UTF-8 file name, or
/// the validation error of that name.
pub fn file_name_of(path: &Path) -> Result<&str, NameError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(NameError::NotUtf8)?;
    validate_file_name(name)?;
    Ok(name)
}

/// What to do when a received file's name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Replace the existing file
    #[default]
    Overwrite,
    /// Keep the existing file and pick `name (n).ext`
    Rename,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "rename" => Ok(Self::Rename),
            other => Err(format!(
                "unknown collision policy '{other}' (expected overwrite or rename)"
            )),
        }
    }
}

/// Destination path for `name` inside `dir` under `policy`.
///
/// Does not create anything. A small window exists between this call and
/// the file being written; acceptable for a single-receiver tool.
#[must_use]
pub fn resolve_destination(dir: &Path, name: &str, policy: CollisionPolicy) -> PathBuf {
    let path = dir.join(name);
    match policy {
        CollisionPolicy::Overwrite => path,
        CollisionPolicy::Rename => find_available_path(dir, name),
    }
}

fn find_available_path(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if !path.exists() {
        return path;
    }

    // Hidden files (".bashrc") keep their whole name as the stem.
    let (stem, extension) = match name.find('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    };

    let (base, mut counter) = match split_counter(stem) {
        Some((base, n)) => (base, n.saturating_add(1)),
        None => (stem, 1),
    };

    loop {
        let candidate = dir.join(format!("{base} ({counter}){extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter = counter.saturating_add(1);
    }
}

/// Split `"report (3)"` into `("report", 3)`.
fn split_counter(stem: &str) -> Option<(&str, u32)> {
    let inner = stem.strip_suffix(')')?;
    let open = inner.rfind(" (")?;
    let n = inner[open + 2..].parse().ok()?;
    Some((&stem[..open], n))
}
