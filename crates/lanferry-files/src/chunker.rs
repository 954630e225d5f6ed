//! Fixed-size chunk planning.

use crate::DEFAULT_CHUNK_SIZE;

/// Splits a byte length into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size
    ///
    /// A zero size is bumped to one byte.
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Length of the next chunk when `remaining` bytes are left
    #[must_use]
    pub fn next_len(&self, remaining: u64) -> usize {
        // Bounded by chunk_size, so the cast cannot truncate.
        remaining.min(self.chunk_size as u64) as usize
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}
