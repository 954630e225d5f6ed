//! SHA-256 checksums for file integrity.
//!
//! Files are streamed through the hash in fixed-size blocks, read exactly
//! once and never loaded fully into memory. Digests are lowercase hex.

use crate::DIGEST_BLOCK_SIZE;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest
pub const HEX_DIGEST_LEN: usize = 64;

/// Incremental SHA-256 hasher.
pub struct ChecksumHasher {
    hasher: Sha256,
}

impl ChecksumHasher {
    /// Create a new hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Update with more data.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize and return the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest an in-memory buffer.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Digest everything readable from `reader`.
///
/// # Errors
///
/// Returns any read error other than `Interrupted`.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = ChecksumHasher::new();
    let mut buffer = vec![0u8; DIGEST_BLOCK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize_hex())
}

/// Compute the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
///
/// # Example
///
/// ```no_run
/// use lanferry_files::checksum::digest_file;
///
/// let digest = digest_file("/path/to/file")?;
/// assert_eq!(digest.len(), 64);
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn digest_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    digest_reader(File::open(path)?)
}

/// Check a file against an expected digest.
///
/// An `expected` value that is not a full-length hex digest never matches
/// and the file is not read.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn verify_file<P: AsRef<Path>>(path: P, expected: &str) -> io::Result<bool> {
    if expected.len() != HEX_DIGEST_LEN {
        tracing::debug!(%expected, "malformed expected digest");
        return Ok(false);
    }
    let actual = digest_file(path)?;
    if actual != expected {
        tracing::debug!(%actual, %expected, "checksum mismatch");
        return Ok(false);
    }
    Ok(true)
}
