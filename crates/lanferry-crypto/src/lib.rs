//! # lanferry Crypto
//!
//! Cryptographic primitives for the lanferry transfer protocol.
//!
//! This crate provides:
//! - Session key generation and its single-line text encoding
//! - Chunked `XChaCha20-Poly1305` file encryption with a per-file salt
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Session key | OS CSPRNG | 256-bit |
//! | Key encoding | Base64 (standard, padded) | N/A |
//! | File encryption | XChaCha20-Poly1305, 64 KiB frames | 256-bit key |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod error;
pub mod key;
pub mod random;

pub use cipher::{ciphertext_len, decrypt_file, encrypt_file};
pub use error::CryptoError;
pub use key::SessionKey;

/// Session key size (32 bytes / 256 bits)
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size
pub const TAG_SIZE: usize = 16;

/// Per-file random salt stored at the head of every ciphertext artifact
pub const SALT_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce size
pub const NONCE_SIZE: usize = 24;

/// Plaintext bytes sealed per ciphertext frame (64 KiB)
pub const CIPHER_CHUNK_SIZE: usize = 64 * 1024;
