//! Sending side of a transfer session.
//!
//! One session writes the key line, then for each file: seals it into a
//! ciphertext artifact, announces and streams it, and waits for the
//! receiver's verdict, retrying the whole exchange on NACK or I/O failure.
//! The next file is sealed while the current one is on the wire, so the
//! receiver is not left waiting for a whole-file encryption between files.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::event::{EventSink, TransferEvent, progress_percent};
use crate::wire::{Announcement, Connection, END_OF_BATCH, Verdict};
use lanferry_crypto::{SessionKey, encrypt_file};
use lanferry_files::naming::file_name_of;
use lanferry_files::storage::STAGING_PREFIX;
use lanferry_files::{FileChunker, NameError, digest_file};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a completed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Files acknowledged
    pub files_sent: usize,
    /// Ciphertext bytes of the acknowledged attempts
    pub bytes_sent: u64,
    /// Attempts made across all files
    pub attempts: u32,
}

/// A file that passed pre-flight checks
#[derive(Debug)]
struct PendingFile {
    path: PathBuf,
    name: String,
}

/// Ciphertext artifact plus what the announcement needs
struct Sealed {
    artifact: NamedTempFile,
    digest: String,
    length: u64,
}

/// Sends batches of files over a connected stream
#[derive(Debug, Clone)]
pub struct Sender {
    config: TransferConfig,
    events: EventSink,
    cancel: CancellationToken,
}

impl Sender {
    /// Create a sender with no event sink
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Publish events to `events`
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Stop at the next I/O boundary when `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Send `files` in order over `stream`.
    ///
    /// The batch is validated before anything is written. Each file gets up
    /// to `max_retries` attempts; the first file that runs out aborts the
    /// session and later files are never sent.
    ///
    /// # Errors
    ///
    /// - [`TransferError::TooManyFiles`], [`TransferError::InvalidFileName`]
    ///   or [`TransferError::NotAFile`] from pre-flight checks
    /// - [`TransferError::RetriesExhausted`] when a file is never
    ///   acknowledged
    /// - [`TransferError::Cancelled`] when the token fires
    /// - I/O errors writing the key line or the end-of-batch marker
    pub async fn send<S>(&self, stream: S, files: &[PathBuf]) -> Result<SendReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.config.validate()?;
        let batch = self.prepare(files).await?;

        let key = SessionKey::generate()?;
        let mut conn = Connection::new(stream)
            .with_timeout(self.config.io_timeout)
            .with_cancellation(self.cancel.clone());

        // Sealing runs one file ahead: the first file while the key line is
        // written, each later file while its predecessor is delivered.
        let mut sealing = batch.first().map(|file| self.spawn_seal(&key, file));
        if let Err(e) = conn.write_line(&key.encode()).await {
            discard(sealing).await;
            return Err(e);
        }
        info!(files = batch.len(), "session started");
        self.events.emit(TransferEvent::SessionStarted { files: batch.len() });

        let mut report = SendReport::default();
        for (index, file) in batch.iter().enumerate() {
            let Some(task) = sealing.take() else {
                break;
            };
            let sealed = finish_seal(file, task).await?;
            sealing = batch.get(index + 1).map(|next| self.spawn_seal(&key, next));

            let outcome = self.deliver(&mut conn, file, &sealed).await;
            if let Err(e) = sealed.artifact.close() {
                warn!(file = %file.name, error = %e, "failed to delete ciphertext artifact");
            }
            match outcome {
                Ok((bytes, attempts)) => {
                    report.files_sent += 1;
                    report.bytes_sent += bytes;
                    report.attempts += attempts;
                }
                Err(e) => {
                    discard(sealing).await;
                    return Err(e);
                }
            }
        }

        conn.write_line(END_OF_BATCH).await?;
        if let Err(e) = conn.shutdown().await {
            warn!(error = %e, "failed to shut down connection after batch");
        }

        info!(
            files = report.files_sent,
            bytes = report.bytes_sent,
            attempts = report.attempts,
            "batch complete"
        );
        self.events.emit(TransferEvent::BatchComplete {
            files: report.files_sent,
        });
        Ok(report)
    }

    async fn prepare(&self, files: &[PathBuf]) -> Result<Vec<PendingFile>> {
        if files.len() > self.config.max_files {
            return Err(TransferError::TooManyFiles {
                count: files.len(),
                max: self.config.max_files,
            });
        }

        let mut batch = Vec::with_capacity(files.len());
        for path in files {
            let name = file_name_of(path).map_err(|reason| TransferError::InvalidFileName {
                name: path.display().to_string(),
                reason,
            })?;
            if name == END_OF_BATCH {
                return Err(TransferError::InvalidFileName {
                    name: name.to_owned(),
                    reason: NameError::Reserved(END_OF_BATCH),
                });
            }

            let metadata = tokio::fs::metadata(path).await?;
            if !metadata.is_file() {
                return Err(TransferError::NotAFile(path.clone()));
            }

            batch.push(PendingFile {
                path: path.clone(),
                name: name.to_owned(),
            });
        }
        Ok(batch)
    }

    /// Encrypt to a temp artifact and digest the plaintext, off the runtime.
    fn spawn_seal(&self, key: &SessionKey, file: &PendingFile) -> JoinHandle<Result<Sealed>> {
        let key = key.clone();
        let path = file.path.clone();
        let temp_dir = self.config.temp_dir();

        tokio::task::spawn_blocking(move || -> Result<Sealed> {
            let artifact = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .suffix(".enc")
                .tempfile_in(&temp_dir)?;
            let length = encrypt_file(&key, &path, artifact.path())?;
            let digest = digest_file(&path)?;
            Ok(Sealed {
                artifact,
                digest,
                length,
            })
        })
    }

    async fn deliver<S>(
        &self,
        conn: &mut Connection<S>,
        file: &PendingFile,
        sealed: &Sealed,
    ) -> Result<(u64, u32)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let announcement = Announcement {
            name: file.name.clone(),
            digest: sealed.digest.clone(),
            length: sealed.length,
        };

        for attempt in 1..=self.config.max_retries {
            debug!(file = %file.name, attempt, bytes = sealed.length, "sending file");
            self.events.emit(TransferEvent::FileStarted {
                name: file.name.clone(),
                attempt,
                bytes_total: sealed.length,
            });

            match self.attempt(conn, &announcement, sealed.artifact.path()).await {
                Ok(Verdict::Ack) => {
                    info!(file = %file.name, attempt, "file acknowledged");
                    self.events.emit(TransferEvent::FileAcknowledged {
                        name: file.name.clone(),
                        attempt,
                    });
                    return Ok((sealed.length, attempt));
                }
                Ok(Verdict::Nack) => {
                    warn!(file = %file.name, attempt, "receiver rejected file");
                    self.events.emit(TransferEvent::FileRejected {
                        name: file.name.clone(),
                        attempt,
                    });
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(file = %file.name, attempt, error = %e, "attempt failed");
                    self.events.emit(TransferEvent::AttemptFailed {
                        name: file.name.clone(),
                        attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }

        error!(
            file = %file.name,
            attempts = self.config.max_retries,
            "retries exhausted, aborting session"
        );
        Err(TransferError::RetriesExhausted {
            file: file.name.clone(),
            attempts: self.config.max_retries,
        })
    }

    /// One full exchange: announce, stream, read the verdict.
    async fn attempt<S>(
        &self,
        conn: &mut Connection<S>,
        announcement: &Announcement,
        artifact: &Path,
    ) -> Result<Verdict>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut source = tokio::fs::File::open(artifact).await?;
        conn.write_announcement(announcement).await?;

        let total = announcement.length;
        let chunker = FileChunker::with_chunk_size(self.config.chunk_size);
        let mut buf = vec![0u8; chunker.next_len(total)];
        let mut sent = 0u64;

        while sent < total {
            let want = chunker.next_len(total - sent);
            source.read_exact(&mut buf[..want]).await?;
            conn.write_chunk(&buf[..want]).await?;
            sent += want as u64;

            self.events.emit(TransferEvent::Progress {
                name: announcement.name.clone(),
                percent: progress_percent(sent, total),
                bytes_done: sent,
                bytes_total: total,
            });
        }
        conn.flush().await?;

        let line = conn
            .read_line_within(Some(self.config.ack_timeout))
            .await?
            .ok_or_else(|| TransferError::unexpected_eof("acknowledgement"))?;
        Ok(Verdict::from_line(&line))
    }
}

async fn finish_seal(file: &PendingFile, task: JoinHandle<Result<Sealed>>) -> Result<Sealed> {
    let sealed = task.await??;
    debug!(
        file = %file.name,
        digest = %sealed.digest,
        bytes = sealed.length,
        "file sealed"
    );
    Ok(sealed)
}

/// Wait out a seal that will not be sent so its artifact is deleted.
async fn discard(sealing: Option<JoinHandle<Result<Sealed>>>) {
    let Some(task) = sealing else {
        return;
    };
    if let Ok(Ok(sealed)) = task.await {
        if let Err(e) = sealed.artifact.close() {
            warn!(error = %e, "failed to delete unsent ciphertext artifact");
        }
    }
}
