//! # lanferry Files
//!
//! File handling for the lanferry transfer protocol.
//!
//! This crate provides:
//! - Streaming SHA-256 checksums for integrity verification
//! - Fixed-size chunk planning for body transfer
//! - Safe naming of received files and collision handling
//! - Receive-folder listing and cleanup

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod chunker;
pub mod naming;
pub mod storage;

pub use checksum::{digest_file, verify_file};
pub use chunker::FileChunker;
pub use naming::{CollisionPolicy, NameError};

/// Default chunk size for body transfer (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Block size used when streaming a file through the digest (64 KiB)
pub const DIGEST_BLOCK_SIZE: usize = 64 * 1024;
