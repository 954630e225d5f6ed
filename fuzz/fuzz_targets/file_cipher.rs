//! Fuzz target for the chunked file cipher
//!
//! Round-trips arbitrary plaintexts and decrypts arbitrary artifacts. Hostile
//! artifacts must be rejected, never accepted or panicking.

#![no_main]

use arbitrary::Arbitrary;
use lanferry_crypto::SessionKey;
use lanferry_crypto::cipher::{decrypt_stream, encrypt_stream};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct CipherInput {
    key: [u8; 32],
    plaintext: Vec<u8>,
    artifact: Vec<u8>,
}

fuzz_target!(|input: CipherInput| {
    let key = SessionKey::new(input.key);

    let mut sealed = Vec::new();
    if encrypt_stream(&key, &input.plaintext[..], &mut sealed).is_ok() {
        let mut opened = Vec::new();
        decrypt_stream(&key, &sealed[..], &mut opened).expect("own artifact must open");
        assert_eq!(opened, input.plaintext);
    }

    // Arbitrary bytes are forged with overwhelming probability
    let mut opened = Vec::new();
    let _ = decrypt_stream(&key, &input.artifact[..], &mut opened);
});
