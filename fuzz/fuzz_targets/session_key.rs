//! Fuzz target for session key decoding
//!
//! Any key line from a peer must decode or fail with an error; a decoded key
//! must encode back to a line that decodes to the same key.

#![no_main]

use lanferry_crypto::SessionKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(key) = SessionKey::decode(line) {
        let encoded = key.encode();
        assert_eq!(encoded.len(), 44);
        let again = SessionKey::decode(&encoded).expect("re-encoded key must decode");
        assert_eq!(again, key);
    }
});
