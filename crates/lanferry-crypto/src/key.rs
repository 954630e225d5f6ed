//! Session key exchange.
//!
//! The sender generates one 256-bit key per session and writes it, base64
//! encoded, as the first line of the connection. The receiver decodes that
//! line and keeps the key for the lifetime of the connection.

use crate::random::random_32;
use crate::{CryptoError, KEY_SIZE};
use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric session key (32 bytes).
///
/// Key material is zeroized on drop and never printed by `Debug`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if slice length is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Generate a fresh key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random_32()?))
    }

    /// Get raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with extreme care - this exposes the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encode the key as standard padded base64.
    ///
    /// The result never contains a newline, so it can be written as a
    /// single protocol line.
    #[must_use]
    pub fn encode(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decode a key produced by [`SessionKey::encode`].
    ///
    /// Surrounding whitespace (including a stray `\r`) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyFormat`] if the text is not valid base64 or
    /// does not decode to exactly 32 bytes.
    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;

        let key = Self::from_slice(&bytes).map_err(|_| {
            CryptoError::KeyFormat(format!(
                "expected {KEY_SIZE} key bytes, got {}",
                bytes.len()
            ))
        });
        bytes.zeroize();
        key
    }

    pub(crate) fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.0).into())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SessionKey {}
