//! Error types for the transfer engine.
//!
//! # Error Categories
//!
//! - **Transient**: I/O failures, deadlines and malformed peer output. On the
//!   sender they cost one attempt; on the receiver they end the connection.
//! - **Key failure**: the session key line could not be decoded. Fatal for
//!   the connection since nothing after it could be decrypted.
//! - **Terminal**: retry exhaustion, cancellation, invalid batches and
//!   configuration. Surfaced to the caller as the session outcome.

use lanferry_crypto::CryptoError;
use lanferry_files::NameError;
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that can occur while sending or receiving a batch
#[derive(Debug, Error)]
pub enum TransferError {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key handling or file encryption failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Peer sent something the protocol does not allow
    #[error("protocol violation: {0}")]
    Protocol(Cow<'static, str>),

    /// A file name cannot be sent or stored
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFileName {
        /// Offending name or path
        name: String,
        /// Why it was refused
        reason: NameError,
    },

    /// A path handed to the sender is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Batch exceeds the configured file limit
    #[error("batch of {count} files exceeds the limit of {max}")]
    TooManyFiles {
        /// Files in the batch
        count: usize,
        /// Configured limit
        max: usize,
    },

    /// A file was not acknowledged within the retry budget
    #[error("gave up on {file} after {attempts} attempts")]
    RetriesExhausted {
        /// File that failed
        file: String,
        /// Attempts made
        attempts: u32,
    },

    /// A read or write missed its deadline
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The cancellation token fired
    #[error("transfer cancelled")]
    Cancelled,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// A blocking worker panicked or was aborted
    #[error("background task failed: {0}")]
    Task(String),
}

impl TransferError {
    /// Build a protocol violation error
    pub fn protocol(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the failure is confined to the current attempt or connection
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::TimedOut(_) | Self::Protocol(_))
    }

    /// Whether the session key line was unusable
    #[must_use]
    pub fn is_key_failure(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::KeyFormat(_) | CryptoError::InvalidKeyLength { .. })
        )
    }

    pub(crate) fn unexpected_eof(what: &str) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended before {what}"),
        ))
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
