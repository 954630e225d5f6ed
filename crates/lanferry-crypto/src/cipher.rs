//! Chunked file encryption.
//!
//! A plaintext file is sealed into a ciphertext artifact made of a random
//! per-file salt followed by a sequence of `XChaCha20-Poly1305` frames:
//!
//! ```text
//! ┌──────────┬──────────────────────┬──────────────────────┬─────┐
//! │ salt(16) │ frame 0 (≤64K + 16)  │ frame 1 (≤64K + 16)  │ ... │
//! └──────────┴──────────────────────┴──────────────────────┴─────┘
//! ```
//!
//! The nonce of frame `i` is `i` (little-endian u64) followed by the salt.
//! The final frame is sealed with a distinct associated-data tag, so a
//! truncated or extended artifact fails authentication. An empty plaintext
//! still produces one (empty) final frame.
//!
//! Both directions stream with a bounded buffer. On error the output is
//! incomplete and must be discarded by the caller.

use crate::random::random_16;
use crate::{CIPHER_CHUNK_SIZE, CryptoError, NONCE_SIZE, SALT_SIZE, SessionKey, TAG_SIZE};
use chacha20poly1305::{XNonce, aead::AeadInPlace};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

const FRAME_AAD: &[u8] = b"lanferry-frame";
const FINAL_FRAME_AAD: &[u8] = b"lanferry-final";

/// Size of the ciphertext artifact produced for `plaintext_len` bytes.
///
/// # Example
///
/// ```
/// use lanferry_crypto::ciphertext_len;
///
/// // salt + one empty final frame
/// assert_eq!(ciphertext_len(0), 32);
/// assert_eq!(ciphertext_len(5), 37);
/// ```
#[must_use]
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    let frames = plaintext_len.div_ceil(CIPHER_CHUNK_SIZE as u64).max(1);
    SALT_SIZE as u64 + plaintext_len + frames * TAG_SIZE as u64
}

/// Encrypt `input` into a new ciphertext artifact at `output`.
///
/// Returns the number of ciphertext bytes written.
///
/// # Errors
///
/// Returns [`CryptoError::Io`] if either file cannot be opened, read or
/// written, and [`CryptoError::EncryptionFailed`] if sealing a frame fails.
pub fn encrypt_file(key: &SessionKey, input: &Path, output: &Path) -> Result<u64, CryptoError> {
    let reader = File::open(input)?;
    let mut writer = BufWriter::new(File::create(output)?);
    let written = encrypt_stream(key, reader, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Decrypt the ciphertext artifact at `input` into `output`.
///
/// Returns the number of plaintext bytes written.
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] or
/// [`CryptoError::MalformedCiphertext`] if the artifact was tampered with,
/// truncated or sealed under another key, and [`CryptoError::Io`] on file
/// errors.
pub fn decrypt_file(key: &SessionKey, input: &Path, output: &Path) -> Result<u64, CryptoError> {
    let reader = File::open(input)?;
    let mut writer = BufWriter::new(File::create(output)?);
    let written = decrypt_stream(key, reader, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Encrypt everything readable from `reader` into `writer`.
///
/// # Errors
///
/// See [`encrypt_file`].
pub fn encrypt_stream<R: Read, W: Write>(
    key: &SessionKey,
    mut reader: R,
    mut writer: W,
) -> Result<u64, CryptoError> {
    let cipher = key.cipher();
    let salt = random_16()?;
    writer.write_all(&salt)?;
    let mut written = SALT_SIZE as u64;

    let mut current = vec![0u8; CIPHER_CHUNK_SIZE];
    let mut lookahead = vec![0u8; CIPHER_CHUNK_SIZE];
    let mut frame = Vec::with_capacity(CIPHER_CHUNK_SIZE + TAG_SIZE);
    let mut len = read_full(&mut reader, &mut current)?;
    let mut index = 0u64;

    loop {
        // A short read means end of input; a full one needs a peek.
        let (next_len, is_final) = if len < CIPHER_CHUNK_SIZE {
            (0, true)
        } else {
            let n = read_full(&mut reader, &mut lookahead)?;
            (n, n == 0)
        };

        frame.clear();
        frame.extend_from_slice(&current[..len]);
        cipher
            .encrypt_in_place(&frame_nonce(index, &salt), frame_aad(is_final), &mut frame)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        writer.write_all(&frame)?;
        written += frame.len() as u64;

        if is_final {
            return Ok(written);
        }

        std::mem::swap(&mut current, &mut lookahead);
        len = next_len;
        index += 1;
    }
}

/// Decrypt a ciphertext artifact read from `reader` into `writer`.
///
/// # Errors
///
/// See [`decrypt_file`].
pub fn decrypt_stream<R: Read, W: Write>(
    key: &SessionKey,
    mut reader: R,
    mut writer: W,
) -> Result<u64, CryptoError> {
    const FRAME_SIZE: usize = CIPHER_CHUNK_SIZE + TAG_SIZE;

    let cipher = key.cipher();
    let mut salt = [0u8; SALT_SIZE];
    if read_full(&mut reader, &mut salt)? != SALT_SIZE {
        return Err(CryptoError::MalformedCiphertext("missing salt"));
    }

    let mut current = vec![0u8; FRAME_SIZE];
    let mut lookahead = vec![0u8; FRAME_SIZE];
    let mut frame = Vec::with_capacity(FRAME_SIZE);
    let mut len = read_full(&mut reader, &mut current)?;
    let mut index = 0u64;
    let mut written = 0u64;

    loop {
        if len < TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext("truncated frame"));
        }

        let (next_len, is_final) = if len < FRAME_SIZE {
            (0, true)
        } else {
            let n = read_full(&mut reader, &mut lookahead)?;
            (n, n == 0)
        };

        frame.clear();
        frame.extend_from_slice(&current[..len]);
        cipher
            .decrypt_in_place(&frame_nonce(index, &salt), frame_aad(is_final), &mut frame)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        writer.write_all(&frame)?;
        written += frame.len() as u64;

        if is_final {
            return Ok(written);
        }

        std::mem::swap(&mut current, &mut lookahead);
        len = next_len;
        index += 1;
    }
}

fn frame_nonce(index: u64, salt: &[u8; SALT_SIZE]) -> XNonce {
    let mut bytes = [0u8; NONCE_SIZE];
    bytes[..8].copy_from_slice(&index.to_le_bytes());
    bytes[8..].copy_from_slice(salt);
    XNonce::clone_from_slice(&bytes)
}

fn frame_aad(is_final: bool) -> &'static [u8] {
    if is_final { FINAL_FRAME_AAD } else { FRAME_AAD }
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roundtrip(plaintext: &[u8]) -> Vec<u8> {
        let key = SessionKey::generate().unwrap();
        let mut sealed = Vec::new();
        let written = encrypt_stream(&key, plaintext, &mut sealed).unwrap();
        assert_eq!(written, sealed.len() as u64);
        assert_eq!(sealed.len() as u64, ciphertext_len(plaintext.len() as u64));

        let mut opened = Vec::new();
        decrypt_stream(&key, &sealed[..], &mut opened).unwrap();
        opened
    }

    #[test]
    fn test_roundtrip_boundary_sizes() {
        for size in [
            0,
            1,
            5,
            CIPHER_CHUNK_SIZE - 1,
            CIPHER_CHUNK_SIZE,
            CIPHER_CHUNK_SIZE + 1,
            3 * CIPHER_CHUNK_SIZE,
        ] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            assert_eq!(roundtrip(&data), data, "size {size}");
        }
    }

    #[test]
    fn test_ciphertext_len() {
        assert_eq!(ciphertext_len(0), 32);
        assert_eq!(ciphertext_len(1), 33);
        assert_eq!(ciphertext_len(CIPHER_CHUNK_SIZE as u64), 16 + 65536 + 16);
        assert_eq!(
            ciphertext_len(CIPHER_CHUNK_SIZE as u64 + 1),
            16 + 65537 + 32
        );
    }

    #[test]
    fn test_same_plaintext_differs_across_files() {
        let key = SessionKey::generate().unwrap();
        let data = vec![0u8; 1024];

        let mut a = Vec::new();
        let mut b = Vec::new();
        encrypt_stream(&key, &data[..], &mut a).unwrap();
        encrypt_stream(&key, &data[..], &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_repeated_blocks_do_not_repeat_in_ciphertext() {
        let key = SessionKey::generate().unwrap();
        let data = vec![0x55u8; 64];
        let mut sealed = Vec::new();
        encrypt_stream(&key, &data[..], &mut sealed).unwrap();

        let body = &sealed[SALT_SIZE..SALT_SIZE + 64];
        assert_ne!(&body[..16], &body[16..32]);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = SessionKey::generate().unwrap();
        let mut sealed = Vec::new();
        encrypt_stream(&key, &b"hello"[..], &mut sealed).unwrap();
        sealed[SALT_SIZE] ^= 0x01;

        let err = decrypt_stream(&key, &sealed[..], Vec::new()).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SessionKey::generate().unwrap();
        let other = SessionKey::generate().unwrap();
        let mut sealed = Vec::new();
        encrypt_stream(&key, &b"hello"[..], &mut sealed).unwrap();

        assert!(decrypt_stream(&other, &sealed[..], Vec::new()).is_err());
    }

    #[test]
    fn test_truncation_at_frame_boundary_rejected() {
        let key = SessionKey::generate().unwrap();
        let data = vec![7u8; 2 * CIPHER_CHUNK_SIZE + 10];
        let mut sealed = Vec::new();
        encrypt_stream(&key, &data[..], &mut sealed).unwrap();

        // Drop the final frame: the previous frame was not sealed as final.
        let cut = SALT_SIZE + 2 * (CIPHER_CHUNK_SIZE + TAG_SIZE);
        let err = decrypt_stream(&key, &sealed[..cut], Vec::new()).unwrap_err();
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn test_short_artifacts_rejected() {
        let key = SessionKey::generate().unwrap();
        assert!(matches!(
            decrypt_stream(&key, &[0u8; 4][..], Vec::new()),
            Err(CryptoError::MalformedCiphertext(_))
        ));
        assert!(matches!(
            decrypt_stream(&key, &[0u8; SALT_SIZE + 3][..], Vec::new()),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("a.txt");
        let sealed = dir.path().join("a.txt.enc");
        let opened = dir.path().join("a.out");
        std::fs::write(&plain, b"hello").unwrap();

        let key = SessionKey::generate().unwrap();
        let written = encrypt_file(&key, &plain, &sealed).unwrap();
        assert_eq!(written, std::fs::metadata(&sealed).unwrap().len());
        assert_eq!(written, ciphertext_len(5));

        let n = decrypt_file(&key, &sealed, &opened).unwrap();
        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&opened).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = TempDir::new().unwrap();
        let key = SessionKey::generate().unwrap();
        let err = encrypt_file(
            &key,
            &dir.path().join("missing"),
            &dir.path().join("out"),
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::Io(_)));
        assert!(!err.is_integrity_failure());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            /// Cutting the artifact short anywhere never yields plaintext
            #[test]
            fn truncated_artifact_never_opens(
                data in prop::collection::vec(any::<u8>(), 0..3 * CIPHER_CHUNK_SIZE),
                cut in any::<prop::sample::Index>(),
            ) {
                let key = SessionKey::new([3u8; 32]);
                let mut sealed = Vec::new();
                encrypt_stream(&key, &data[..], &mut sealed).unwrap();

                let keep = cut.index(sealed.len());
                prop_assert!(decrypt_stream(&key, &sealed[..keep], Vec::new()).is_err());
            }

            /// Artifact size is salt + plaintext + one tag per frame
            #[test]
            fn ciphertext_len_counts_frames(len in 0u64..(1 << 40)) {
                let frames = len.div_ceil(CIPHER_CHUNK_SIZE as u64).max(1);
                let overhead = ciphertext_len(len) - len - SALT_SIZE as u64;
                prop_assert_eq!(overhead, frames * TAG_SIZE as u64);
            }
        }
    }
}
