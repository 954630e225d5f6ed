//! Transfer configuration

use crate::error::{Result, TransferError};
use lanferry_files::{CollisionPolicy, DEFAULT_CHUNK_SIZE};
use std::path::PathBuf;
use std::time::Duration;

/// Attempts per file before the sender gives up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Largest batch a sender will start
pub const DEFAULT_MAX_FILES: usize = 30;

/// How long the receiver waits between files
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Upper bound on the streaming chunk size
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Settings shared by [`Sender`](crate::Sender) and [`Receiver`](crate::Receiver)
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per streamed write and per progress step
    pub chunk_size: usize,

    /// Attempts per file, including the first
    pub max_retries: u32,

    /// Deadline for a single read or write on the socket
    pub io_timeout: Duration,

    /// Deadline for the receiver's verdict after the last body byte.
    ///
    /// Longer than `io_timeout` because the receiver decrypts and hashes the
    /// whole file before it answers.
    pub ack_timeout: Duration,

    /// Deadline for the receiver's wait on the session key and on the first
    /// line of each announcement.
    ///
    /// The sender encrypts and hashes the next file while the receiver
    /// waits here, so this bounds a whole-file operation, not a socket read.
    pub idle_timeout: Duration,

    /// Largest batch the sender accepts
    pub max_files: usize,

    /// Directory for encrypted artifacts. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// What the receiver does when a file with the same name exists
    pub collision: CollisionPolicy,

    /// Keep decrypted files that failed verification
    pub keep_rejected: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            io_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(120),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_files: DEFAULT_MAX_FILES,
            temp_dir: None,
            collision: CollisionPolicy::default(),
            keep_rejected: false,
        }
    }
}

impl TransferConfig {
    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidConfig(
                format!("chunk_size must be between 1 and {MAX_CHUNK_SIZE}").into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(TransferError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.max_files == 0 {
            return Err(TransferError::InvalidConfig(
                "max_files must be at least 1".into(),
            ));
        }
        if self.io_timeout.is_zero()
            || self.ack_timeout.is_zero()
            || self.idle_timeout.is_zero()
        {
            return Err(TransferError::InvalidConfig(
                "timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Directory for temporary artifacts
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_files, 30);
        assert_eq!(config.collision, CollisionPolicy::Overwrite);
        assert!(!config.keep_rejected);
        assert!(config.idle_timeout > config.ack_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));

        let config = TransferConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransferConfig {
            io_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransferConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_chunks() {
        let config = TransferConfig {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temp_dir_fallback() {
        let config = TransferConfig::default();
        assert_eq!(config.temp_dir(), std::env::temp_dir());

        let config = TransferConfig {
            temp_dir: Some(PathBuf::from("/var/tmp/lanferry")),
            ..Default::default()
        };
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/lanferry"));
    }
}
