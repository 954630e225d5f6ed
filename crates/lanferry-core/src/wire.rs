//! Line-oriented wire codec.
//!
//! Control data travels as `\n`-terminated UTF-8 lines; file bodies are raw
//! bytes whose count was announced on the preceding length line. Every read
//! and write goes through [`Connection`], which applies the I/O deadline and
//! races the cancellation token.

use crate::error::{Result, TransferError};
use lanferry_files::FileChunker;
use std::future::Future;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio_util::sync::CancellationToken;

/// Receiver accepted the file
pub const ACK: &str = "ACK";

/// Receiver rejected the file
pub const NACK: &str = "NACK";

/// File-name value that ends the batch
pub const END_OF_BATCH: &str = "END";

/// Longest accepted control line, excluding the terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Three-line header that precedes a file body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// File name, a single path component
    pub name: String,
    /// Lowercase hex SHA-256 of the plaintext
    pub digest: String,
    /// Ciphertext bytes that follow
    pub length: u64,
}

impl Announcement {
    /// Wire form: `name\ndigest\nlength\n`
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}\n{}\n{}\n", self.name, self.digest, self.length)
    }
}

/// Receiver's answer to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// File stored and verified
    Ack,
    /// Anything else
    Nack,
}

impl Verdict {
    /// Interpret an acknowledgement line. Only the exact `ACK` token accepts.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        if line == ACK { Self::Ack } else { Self::Nack }
    }

    /// Token written on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => ACK,
            Self::Nack => NACK,
        }
    }
}

/// What the receiver found where a file name was expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// Another file follows
    File(Announcement),
    /// Sender wrote the sentinel
    EndOfBatch,
    /// Stream ended cleanly before a name line
    Disconnected,
}

/// Parse a decimal length line.
///
/// # Errors
///
/// Returns a protocol error unless the line is plain ASCII digits that fit
/// in a `u64`.
pub fn parse_length(line: &str) -> Result<u64> {
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TransferError::protocol(format!(
            "invalid length line {line:?}"
        )));
    }
    line.parse()
        .map_err(|_| TransferError::protocol(format!("length {line} out of range")))
}

/// A protocol stream with deadlines and cancellation
#[derive(Debug)]
pub struct Connection<S> {
    stream: BufReader<S>,
    io_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream. No deadline, never cancelled.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            io_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Apply `timeout` to every read and write
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Abort pending operations when `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Read one line under the connection deadline.
    ///
    /// Returns `None` on a clean end-of-stream before any byte of the line.
    ///
    /// # Errors
    ///
    /// I/O errors (including `UnexpectedEof` for a line cut short),
    /// timeouts, cancellation, and protocol errors for lines that are too
    /// long or not UTF-8.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.read_line_within(self.io_timeout).await
    }

    /// Read one line under an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`Connection::read_line`].
    pub async fn read_line_within(&mut self, limit: Option<Duration>) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let stream = &mut self.stream;
        let read = async {
            (&mut *stream)
                .take(MAX_LINE_LEN as u64 + 2)
                .read_until(b'\n', &mut buf)
                .await
                .map_err(TransferError::from)
        };
        let n = guard(limit, &self.cancel, read).await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            if buf.len() > MAX_LINE_LEN {
                return Err(TransferError::protocol(format!(
                    "line exceeds {MAX_LINE_LEN} bytes"
                )));
            }
            return Err(TransferError::unexpected_eof("end of line"));
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.len() > MAX_LINE_LEN {
            return Err(TransferError::protocol(format!(
                "line exceeds {MAX_LINE_LEN} bytes"
            )));
        }

        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| TransferError::protocol("line is not valid UTF-8"))
    }

    /// Read a line that must be present.
    ///
    /// # Errors
    ///
    /// End-of-stream becomes an `UnexpectedEof` I/O error naming `what`.
    pub async fn expect_line(&mut self, what: &str) -> Result<String> {
        self.read_line()
            .await?
            .ok_or_else(|| TransferError::unexpected_eof(what))
    }

    /// Write `line` plus terminator and flush.
    ///
    /// # Errors
    ///
    /// I/O errors, timeouts and cancellation.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let framed = format!("{line}\n");
        self.write_flushed(framed.as_bytes()).await
    }

    /// Write a file announcement and flush.
    ///
    /// # Errors
    ///
    /// I/O errors, timeouts and cancellation.
    pub async fn write_announcement(&mut self, announcement: &Announcement) -> Result<()> {
        self.write_flushed(announcement.encode().as_bytes()).await
    }

    /// Read the next announcement, sentinel, or clean end-of-stream.
    ///
    /// # Errors
    ///
    /// End-of-stream after the name line is an I/O error; a malformed length
    /// line is a protocol error.
    pub async fn read_header(&mut self) -> Result<Header> {
        self.read_header_within(self.io_timeout).await
    }

    /// Read the next header, waiting up to `limit` for its first line.
    ///
    /// The digest and length lines that follow use the connection deadline.
    ///
    /// # Errors
    ///
    /// See [`Connection::read_header`].
    pub async fn read_header_within(&mut self, limit: Option<Duration>) -> Result<Header> {
        let Some(name) = self.read_line_within(limit).await? else {
            return Ok(Header::Disconnected);
        };
        if name == END_OF_BATCH {
            return Ok(Header::EndOfBatch);
        }
        let digest = self.expect_line("digest line").await?;
        let length = parse_length(&self.expect_line("length line").await?)?;
        Ok(Header::File(Announcement {
            name,
            digest,
            length,
        }))
    }

    /// Write raw body bytes without flushing.
    ///
    /// # Errors
    ///
    /// I/O errors, timeouts and cancellation.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        let write = async { stream.write_all(data).await.map_err(TransferError::from) };
        guard(self.io_timeout, &self.cancel, write).await
    }

    /// Flush buffered writes.
    ///
    /// # Errors
    ///
    /// I/O errors, timeouts and cancellation.
    pub async fn flush(&mut self) -> Result<()> {
        let stream = &mut self.stream;
        let flush = async { stream.flush().await.map_err(TransferError::from) };
        guard(self.io_timeout, &self.cancel, flush).await
    }

    /// Copy exactly `length` body bytes into `sink`.
    ///
    /// Reads at most `chunk_size` bytes at a time, however the peer's writes
    /// were fragmented, and calls `on_chunk` with the running total.
    ///
    /// # Errors
    ///
    /// `UnexpectedEof` if the stream ends early; I/O errors from either side,
    /// timeouts and cancellation.
    pub async fn read_body<W, F>(
        &mut self,
        length: u64,
        chunk_size: usize,
        sink: &mut W,
        mut on_chunk: F,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        let chunker = FileChunker::with_chunk_size(chunk_size);
        let mut buf = vec![0u8; chunker.next_len(length)];
        let mut remaining = length;

        while remaining > 0 {
            let want = chunker.next_len(remaining);
            let stream = &mut self.stream;
            let target = &mut buf[..want];
            let read = async { stream.read(target).await.map_err(TransferError::from) };
            let n = guard(self.io_timeout, &self.cancel, read).await?;
            if n == 0 {
                return Err(TransferError::unexpected_eof("end of file body"));
            }

            sink.write_all(&buf[..n]).await?;
            remaining -= n as u64;
            on_chunk(length - remaining);
        }
        Ok(())
    }

    /// Shut down the write half.
    ///
    /// # Errors
    ///
    /// I/O errors, timeouts and cancellation.
    pub async fn shutdown(&mut self) -> Result<()> {
        let stream = &mut self.stream;
        let shutdown = async { stream.shutdown().await.map_err(TransferError::from) };
        guard(self.io_timeout, &self.cancel, shutdown).await
    }

    async fn write_flushed(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        let write = async { write.await.map_err(TransferError::from) };
        guard(self.io_timeout, &self.cancel, write).await
    }
}

/// Run `fut` under an optional deadline, aborting when `cancel` fires.
async fn guard<T, F>(limit: Option<Duration>, cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Cancelled),
        res = within(limit, fut) => res,
    }
}

async fn within<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransferError::TimedOut(limit))?,
        None => fut.await,
    }
}
