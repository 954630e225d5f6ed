//! Fuzz target for the receiver's header parsing
//!
//! Feeds arbitrary bytes to the line reader and header parser as if they came
//! from a peer. Parsing must end in a header or an error, never a panic.

#![no_main]

use lanferry_core::wire::{Connection, Header};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

fn runtime() -> &'static Runtime {
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("fuzz runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    runtime().block_on(async {
        let (local, mut remote) = tokio::io::duplex(data.len().max(1));
        if remote.write_all(data).await.is_err() {
            return;
        }
        drop(remote);

        let mut conn = Connection::new(local);
        let _ = conn.read_line().await;
        // Bounded by input size: each header consumes at least one byte
        for _ in 0..=data.len() {
            match conn.read_header().await {
                Ok(Header::File(announcement)) => {
                    let mut sink = Vec::new();
                    let length = announcement.length.min(data.len() as u64);
                    if conn.read_body(length, 4096, &mut sink, |_| {}).await.is_err() {
                        break;
                    }
                }
                Ok(Header::EndOfBatch) | Ok(Header::Disconnected) | Err(_) => break,
            }
        }
    });
});
