//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Encoded key could not be turned back into key bytes
    #[error("malformed session key: {0}")]
    KeyFormat(String),

    /// Ciphertext artifact is structurally invalid (missing salt, short frame)
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Reading the input or writing the output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Whether the ciphertext itself was rejected, as opposed to a local
    /// I/O or key problem.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailed | Self::MalformedCiphertext(_))
    }
}
