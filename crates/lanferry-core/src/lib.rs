//! # lanferry Core
//!
//! Transfer protocol engine for lanferry: the paired sender/receiver logic
//! that shares a session key, streams files with per-file integrity
//! verification and acknowledgement-based retry, and reports progress.
//!
//! ## Wire Protocol
//!
//! ```text
//! <connection established>
//! ENCODED_KEY\n
//! repeat per file:
//!   FILE_NAME\n
//!   HEX_DIGEST\n
//!   CIPHERTEXT_LENGTH\n
//!   <CIPHERTEXT_LENGTH raw bytes>
//!   <receiver replies "ACK\n" | "NACK\n">
//! END\n
//! <connection closed>
//! ```
//!
//! The digest is SHA-256 over the plaintext; the length counts ciphertext
//! bytes. Peer discovery is out of scope: the host hands the engine a
//! connected stream (sender) or a bound listener (receiver).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod receiver;
pub mod sender;
pub mod state;
pub mod wire;

pub use config::TransferConfig;
pub use error::{Result, TransferError};
pub use event::{EventSink, TransferEvent};
pub use receiver::{ConnectionReport, Receiver};
pub use sender::{SendReport, Sender};
pub use state::ReceiverState;
pub use wire::{ACK, Announcement, END_OF_BATCH, NACK};
