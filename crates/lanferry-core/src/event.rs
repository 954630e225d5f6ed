//! Transfer events.
//!
//! Sessions report what they are doing through an [`EventSink`]. Hosts that
//! want progress keep the receiving half of the channel; hosts that don't
//! use [`EventSink::disabled`].

use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Something observable that happened during a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Key line written (sender)
    SessionStarted {
        /// Files in the batch
        files: usize,
    },

    /// An attempt to send a file began
    FileStarted {
        /// File name as announced
        name: String,
        /// Attempt number, starting at 1
        attempt: u32,
        /// Ciphertext bytes to stream
        bytes_total: u64,
    },

    /// Body bytes went out (sender) or came in (receiver)
    Progress {
        /// File name as announced
        name: String,
        /// Whole percent, 0..=100
        percent: u8,
        /// Bytes moved so far
        bytes_done: u64,
        /// Bytes in the body
        bytes_total: u64,
    },

    /// An attempt failed without a verdict
    AttemptFailed {
        /// File name as announced
        name: String,
        /// Attempt number
        attempt: u32,
        /// Why it failed
        reason: String,
    },

    /// Receiver answered ACK
    FileAcknowledged {
        /// File name as announced
        name: String,
        /// Attempt that succeeded
        attempt: u32,
    },

    /// Receiver answered NACK
    FileRejected {
        /// File name as announced
        name: String,
        /// Attempt that was rejected
        attempt: u32,
    },

    /// END written, every file acknowledged
    BatchComplete {
        /// Files delivered
        files: usize,
    },

    /// Receiver took a new connection
    ConnectionAccepted {
        /// Remote address
        peer: SocketAddr,
    },

    /// A verified file was stored
    FileReceived {
        /// File name as announced
        name: String,
        /// Where it was stored
        path: PathBuf,
        /// Plaintext size in bytes
        size: u64,
    },

    /// Decryption or digest check failed and NACK was sent
    IntegrityFailure {
        /// File name as announced
        name: String,
    },

    /// Peer finished the batch with END or closed cleanly
    ConnectionClosed {
        /// Files stored on this connection
        received: usize,
    },

    /// Connection ended on an error
    ConnectionAborted {
        /// What went wrong
        reason: String,
    },
}

/// Sending half of the event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventSink {
    /// Create a connected sink and its receiver
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops every event
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event. A closed receiver is ignored.
    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Whole-percent progress, rounded to nearest.
///
/// An empty body counts as complete.
#[must_use]
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u128::from(done.min(total));
    let total = u128::from(total);
    ((done * 100 + total / 2) / total) as u8
}
