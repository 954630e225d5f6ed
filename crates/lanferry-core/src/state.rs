//! Receiver connection state machine.

use std::fmt;
use tracing::debug;

/// Where a receiver connection is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for the session key line
    AwaitKey,
    /// Waiting for a file name or END
    AwaitHeader,
    /// Reading the announced ciphertext bytes
    ReceivingBytes,
    /// Decrypting and checking the digest
    Verifying,
    /// Writing ACK or NACK
    Responding,
    /// Connection finished
    Closed,
}

impl ReceiverState {
    /// Whether moving to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReceiverState::*;
        matches!(
            (self, next),
            (AwaitKey, AwaitHeader)
                | (AwaitHeader, ReceivingBytes)
                | (ReceivingBytes, Verifying)
                | (Verifying, Responding)
                | (Responding, AwaitHeader)
                | (_, Closed)
        )
    }

    /// Whether the connection is finished
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitKey => "await-key",
            Self::AwaitHeader => "await-header",
            Self::ReceivingBytes => "receiving-bytes",
            Self::Verifying => "verifying",
            Self::Responding => "responding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one connection
#[derive(Debug)]
pub(crate) struct StateTracker {
    state: ReceiverState,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: ReceiverState::AwaitKey,
        }
    }

    pub(crate) fn current(&self) -> ReceiverState {
        self.state
    }

    /// Move to `next`. Illegal moves are a bug in the receiver loop.
    pub(crate) fn advance(&mut self, next: ReceiverState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal receiver transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "receiver state");
        self.state = next;
    }
}
