//! Receiving side of a transfer session.
//!
//! The accept loop handles one connection at a time. Each connection reads
//! the session key, then loops over announcements: body bytes go to a temp
//! artifact, are decrypted into a staging file next to the destination, and
//! the plaintext digest decides between ACK and NACK.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::event::{EventSink, TransferEvent, progress_percent};
use crate::state::{ReceiverState, StateTracker};
use crate::wire::{ACK, Announcement, Connection, Header, NACK};
use lanferry_crypto::{SessionKey, decrypt_file};
use lanferry_files::naming::{resolve_destination, validate_file_name};
use lanferry_files::storage::STAGING_PREFIX;
use lanferry_files::{CollisionPolicy, verify_file};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What one connection delivered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    /// Stored paths of verified files, in arrival order
    pub received: Vec<PathBuf>,
    /// Announced names that were answered with NACK
    pub rejected: Vec<String>,
}

enum Verification {
    Accepted { path: PathBuf, size: u64 },
    Rejected,
}

/// Accepts connections and stores verified files in a destination folder
#[derive(Debug, Clone)]
pub struct Receiver {
    config: TransferConfig,
    destination: PathBuf,
    events: EventSink,
    cancel: CancellationToken,
}

impl Receiver {
    /// Create a receiver storing files in `destination`
    pub fn new(config: TransferConfig, destination: impl Into<PathBuf>) -> Self {
        Self {
            config,
            destination: destination.into(),
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

    /// Stop the accept loop and any open connection when `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Folder receiving files
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Accept and handle connections until cancelled.
    ///
    /// A failed connection is logged and the loop moves on to the next one.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or the destination folder cannot be created.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.config.validate()?;
        tokio::fs::create_dir_all(&self.destination).await?;

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, destination = %self.destination.display(), "receiver listening");
        }

        loop {
            let accepted = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                res = listener.accept() => res,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            info!(%peer, "connection accepted");
            self.events.emit(TransferEvent::ConnectionAccepted { peer });

            match self.handle_connection(stream).await {
                Ok(report) => info!(
                    %peer,
                    received = report.received.len(),
                    rejected = report.rejected.len(),
                    "connection finished"
                ),
                Err(TransferError::Cancelled) => break,
                Err(e) if e.is_key_failure() => {
                    warn!(%peer, error = %e, "peer sent an unusable session key");
                }
                Err(e) => warn!(%peer, error = %e, "connection aborted"),
            }
        }

        info!("receiver stopped");
        Ok(())
    }

    /// Run the receive protocol on one connected stream.
    ///
    /// Files verified before an error stay stored; the error reports why the
    /// connection ended early.
    ///
    /// # Errors
    ///
    /// Key decode failures, protocol violations, I/O errors, timeouts and
    /// cancellation. A clean end-of-stream or `END` is success.
    pub async fn handle_connection<S>(&self, stream: S) -> Result<ConnectionReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(stream)
            .with_timeout(self.config.io_timeout)
            .with_cancellation(self.cancel.clone());
        let mut tracker = StateTracker::new();
        let mut report = ConnectionReport::default();

        let result = self.drive(&mut conn, &mut tracker, &mut report).await;
        let last_state = tracker.current();
        tracker.advance(ReceiverState::Closed);

        match &result {
            Ok(()) => self.events.emit(TransferEvent::ConnectionClosed {
                received: report.received.len(),
            }),
            Err(e) => {
                debug!(state = %last_state, error = %e, "connection failed");
                self.events.emit(TransferEvent::ConnectionAborted {
                    reason: e.to_string(),
                });
            }
        }

        if let Err(e) = conn.shutdown().await {
            debug!(error = %e, "shutdown after connection failed");
        }
        result.map(|()| report)
    }

    async fn drive<S>(
        &self,
        conn: &mut Connection<S>,
        tracker: &mut StateTracker,
        report: &mut ConnectionReport,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::fs::create_dir_all(&self.destination).await?;
        let idle = Some(self.config.idle_timeout);
        let key_line = conn
            .read_line_within(idle)
            .await?
            .ok_or_else(|| TransferError::unexpected_eof("session key"))?;
        let key = SessionKey::decode(&key_line)?;
        tracker.advance(ReceiverState::AwaitHeader);

        loop {
            let announcement = match conn.read_header_within(idle).await? {
                Header::File(announcement) => announcement,
                Header::EndOfBatch => {
                    debug!("end of batch");
                    return Ok(());
                }
                Header::Disconnected => {
                    debug!("peer closed the connection");
                    return Ok(());
                }
            };

            if let Err(reason) = validate_file_name(&announcement.name) {
                return Err(TransferError::protocol(format!(
                    "peer announced unusable file name {:?}: {reason}",
                    announcement.name
                )));
            }

            tracker.advance(ReceiverState::ReceivingBytes);
            debug!(
                file = %announcement.name,
                bytes = announcement.length,
                "receiving file"
            );
            let artifact = self.receive_body(conn, &announcement).await?;

            tracker.advance(ReceiverState::Verifying);
            let verification = self.verify(&key, &announcement, artifact).await?;

            tracker.advance(ReceiverState::Responding);
            match verification {
                Verification::Accepted { path, size } => {
                    conn.write_line(ACK).await?;
                    info!(file = %announcement.name, path = %path.display(), size, "file received");
                    self.events.emit(TransferEvent::FileReceived {
                        name: announcement.name,
                        path: path.clone(),
                        size,
                    });
                    report.received.push(path);
                }
                Verification::Rejected => {
                    conn.write_line(NACK).await?;
                    warn!(file = %announcement.name, "integrity check failed, sent NACK");
                    self.events.emit(TransferEvent::IntegrityFailure {
                        name: announcement.name.clone(),
                    });
                    report.rejected.push(announcement.name);
                }
            }
            tracker.advance(ReceiverState::AwaitHeader);
        }
    }

    /// Copy exactly the announced ciphertext bytes into a temp artifact.
    async fn receive_body<S>(
        &self,
        conn: &mut Connection<S>,
        announcement: &Announcement,
    ) -> Result<NamedTempFile>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let artifact = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".enc")
            .tempfile_in(self.config.temp_dir())?;
        let mut sink = tokio::fs::File::from_std(artifact.as_file().try_clone()?);

        let total = announcement.length;
        let mut last_percent = None;
        conn.read_body(total, self.config.chunk_size, &mut sink, |done| {
            let percent = progress_percent(done, total);
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                self.events.emit(TransferEvent::Progress {
                    name: announcement.name.clone(),
                    percent,
                    bytes_done: done,
                    bytes_total: total,
                });
            }
        })
        .await?;
        sink.flush().await?;

        Ok(artifact)
    }

    /// Decrypt and check the digest, off the runtime.
    async fn verify(
        &self,
        key: &SessionKey,
        announcement: &Announcement,
        artifact: NamedTempFile,
    ) -> Result<Verification> {
        let key = key.clone();
        let name = announcement.name.clone();
        let digest = announcement.digest.clone();
        let destination = self.destination.clone();
        let collision = self.config.collision;
        let keep_rejected = self.config.keep_rejected;

        tokio::task::spawn_blocking(move || {
            open_artifact(
                &key,
                artifact,
                &destination,
                &name,
                &digest,
                collision,
                keep_rejected,
            )
        })
        .await?
    }
}

fn open_artifact(
    key: &SessionKey,
    artifact: NamedTempFile,
    destination: &Path,
    name: &str,
    digest: &str,
    collision: CollisionPolicy,
    keep_rejected: bool,
) -> Result<Verification> {
    let staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".part")
        .tempfile_in(destination)?;

    let decrypted = decrypt_file(key, artifact.path(), staged.path());
    if let Err(e) = artifact.close() {
        warn!(file = %name, error = %e, "failed to delete ciphertext artifact");
    }

    let size = match decrypted {
        Ok(size) => size,
        Err(e) if e.is_integrity_failure() => {
            warn!(file = %name, error = %e, "ciphertext failed authentication");
            return Ok(Verification::Rejected);
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_file(staged.path(), digest)? {
        warn!(file = %name, expected = %digest, "plaintext digest mismatch");
        if keep_rejected {
            let path = resolve_destination(destination, name, collision);
            staged.persist(&path).map_err(|e| e.error)?;
            info!(path = %path.display(), "kept rejected file");
        }
        return Ok(Verification::Rejected);
    }

    let path = resolve_destination(destination, name, collision);
    staged.persist(&path).map_err(|e| e.error)?;
    Ok(Verification::Accepted { path, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::Sender;
    use crate::wire::END_OF_BATCH;
    use lanferry_crypto::cipher::encrypt_stream;
    use lanferry_files::checksum::digest_bytes;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, duplex};
    use tokio::net::TcpStream;

    struct Fixture {
        scratch: TempDir,
        dest: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                scratch: TempDir::new().unwrap(),
                dest: TempDir::new().unwrap(),
            }
        }

        fn config(&self) -> TransferConfig {
            TransferConfig {
                temp_dir: Some(self.scratch.path().to_path_buf()),
                chunk_size: 8,
                ..Default::default()
            }
        }

        fn receiver(&self) -> Receiver {
            Receiver::new(self.config(), self.dest.path())
        }

        fn stored(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.dest.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    /// Scripted sender side of a connection
    struct Peer {
        conn: Connection<DuplexStream>,
        key: SessionKey,
    }

    impl Peer {
        async fn start(stream: DuplexStream) -> Self {
            let mut conn = Connection::new(stream);
            let key = SessionKey::generate().unwrap();
            conn.write_line(&key.encode()).await.unwrap();
            Self { conn, key }
        }

        async fn offer(&mut self, name: &str, digest: &str, body: &[u8]) -> String {
            self.conn
                .write_announcement(&Announcement {
                    name: name.into(),
                    digest: digest.into(),
                    length: body.len() as u64,
                })
                .await
                .unwrap();
            self.conn.write_chunk(body).await.unwrap();
            self.conn.flush().await.unwrap();
            self.conn.expect_line("verdict").await.unwrap()
        }

        fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
            let mut sealed = Vec::new();
            encrypt_stream(&self.key, plaintext, &mut sealed).unwrap();
            sealed
        }

        async fn finish(mut self) {
            self.conn.write_line(END_OF_BATCH).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_receives_and_acks_valid_file() {
        let fx = Fixture::new();
        let (events, mut rx) = EventSink::channel();
        let receiver = fx.receiver().with_events(events);

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            let body = peer.seal(b"hello");
            let verdict = peer.offer("a.txt", &digest_bytes(b"hello"), &body).await;
            peer.finish().await;
            verdict
        });

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(peer.await.unwrap(), ACK);

        let stored = fx.dest.path().join("a.txt");
        assert_eq!(report.received, vec![stored.clone()]);
        assert!(report.rejected.is_empty());
        assert_eq!(fs::read(&stored).unwrap(), b"hello");
        assert_eq!(fx.stored(), vec!["a.txt"]);
        assert_eq!(fs::read_dir(fx.scratch.path()).unwrap().count(), 0);

        let mut received = Vec::new();
        let mut closed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                TransferEvent::FileReceived { name, path, size } => {
                    received.push((name, path, size));
                }
                TransferEvent::ConnectionClosed { received: 1 } => closed = true,
                _ => {}
            }
        }
        assert_eq!(received, vec![("a.txt".to_string(), stored, 5)]);
        assert!(closed);
    }

    #[tokio::test]
    async fn test_corrupted_ciphertext_is_nacked() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            let mut body = peer.seal(b"hello");
            body[20] ^= 0xFF;
            let first = peer.offer("a.txt", &digest_bytes(b"hello"), &body).await;

            // Loop carries on to the next file
            let body = peer.seal(b"world");
            let second = peer.offer("b.txt", &digest_bytes(b"world"), &body).await;
            peer.finish().await;
            (first, second)
        });

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(peer.await.unwrap(), (NACK.to_string(), ACK.to_string()));
        assert_eq!(report.rejected, vec!["a.txt"]);
        assert_eq!(report.received.len(), 1);
        assert_eq!(fx.stored(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_nacked_and_discarded() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            let body = peer.seal(b"hello");
            let verdict = peer.offer("a.txt", &digest_bytes(b"jello"), &body).await;
            peer.finish().await;
            verdict
        });

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(peer.await.unwrap(), NACK);
        assert_eq!(report.rejected, vec!["a.txt"]);
        assert!(fx.stored().is_empty());
    }

    #[tokio::test]
    async fn test_keep_rejected_leaves_file_in_place() {
        let fx = Fixture::new();
        let receiver = Receiver::new(
            TransferConfig {
                keep_rejected: true,
                ..fx.config()
            },
            fx.dest.path(),
        );

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            let body = peer.seal(b"hello");
            let verdict = peer.offer("a.txt", &"0".repeat(64), &body).await;
            peer.finish().await;
            verdict
        });

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(peer.await.unwrap(), NACK);
        assert!(report.received.is_empty());
        assert_eq!(fs::read(fx.dest.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_rename_policy_keeps_existing_file() {
        let fx = Fixture::new();
        fs::write(fx.dest.path().join("a.txt"), b"old").unwrap();
        let receiver = Receiver::new(
            TransferConfig {
                collision: CollisionPolicy::Rename,
                ..fx.config()
            },
            fx.dest.path(),
        );

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            let body = peer.seal(b"new");
            peer.offer("a.txt", &digest_bytes(b"new"), &body).await;
            peer.finish().await;
        });

        let report = receiver.handle_connection(local).await.unwrap();
        peer.await.unwrap();

        assert_eq!(report.received, vec![fx.dest.path().join("a (1).txt")]);
        assert_eq!(fs::read(fx.dest.path().join("a.txt")).unwrap(), b"old");
        assert_eq!(fs::read(fx.dest.path().join("a (1).txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_pause_between_files_outlasts_io_timeout() {
        let fx = Fixture::new();
        let receiver = Receiver::new(
            TransferConfig {
                io_timeout: Duration::from_millis(50),
                idle_timeout: Duration::from_secs(10),
                ..fx.config()
            },
            fx.dest.path(),
        );
        let pause = Duration::from_millis(300);

        let (local, remote) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut peer = Peer::start(remote).await;
            tokio::time::sleep(pause).await;
            let body = peer.seal(b"first");
            let first = peer.offer("a.txt", &digest_bytes(b"first"), &body).await;

            tokio::time::sleep(pause).await;
            let body = peer.seal(b"second");
            let second = peer.offer("b.txt", &digest_bytes(b"second"), &body).await;
            peer.finish().await;
            (first, second)
        });

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(peer.await.unwrap(), (ACK.to_string(), ACK.to_string()));
        assert_eq!(report.received.len(), 2);
        assert_eq!(fx.stored(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_idle_timeout_bounds_header_wait() {
        let fx = Fixture::new();
        let receiver = Receiver::new(
            TransferConfig {
                idle_timeout: Duration::from_millis(100),
                ..fx.config()
            },
            fx.dest.path(),
        );

        let (local, remote) = duplex(1024);
        let _peer = Peer::start(remote).await;

        let err = receiver.handle_connection(local).await.unwrap_err();
        assert!(
            matches!(err, TransferError::TimedOut(limit) if limit == Duration::from_millis(100)),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_bad_key_line_is_fatal() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(1024);
        let mut peer = Connection::new(remote);
        peer.write_line("definitely-not-a-key").await.unwrap();

        let err = receiver.handle_connection(local).await.unwrap_err();
        assert!(err.is_key_failure(), "{err:?}");
    }

    #[tokio::test]
    async fn test_unsafe_name_aborts_connection() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(64 * 1024);
        let mut peer = Peer::start(remote).await;
        peer.conn
            .write_announcement(&Announcement {
                name: "../escape.txt".into(),
                digest: digest_bytes(b"x"),
                length: 1,
            })
            .await
            .unwrap();

        let err = receiver.handle_connection(local).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        assert!(fx.stored().is_empty());
        assert!(!fx.dest.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_clean_eof_after_key_is_success() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(1024);
        let peer = Peer::start(remote).await;
        drop(peer);

        let report = receiver.handle_connection(local).await.unwrap();
        assert_eq!(report, ConnectionReport::default());
    }

    #[tokio::test]
    async fn test_truncated_body_aborts_connection() {
        let fx = Fixture::new();
        let receiver = fx.receiver();

        let (local, remote) = duplex(64 * 1024);
        let mut peer = Peer::start(remote).await;
        peer.conn
            .write_announcement(&Announcement {
                name: "a.txt".into(),
                digest: digest_bytes(b"hello"),
                length: 100,
            })
            .await
            .unwrap();
        peer.conn.write_chunk(b"short").await.unwrap();
        drop(peer);

        let err = receiver.handle_connection(local).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
        assert!(fx.stored().is_empty());
        assert_eq!(fs::read_dir(fx.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_accept_loop_survives_aborted_connection() {
        let fx = Fixture::new();
        let files = TempDir::new().unwrap();
        let path = files.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();

        let token = CancellationToken::new();
        let (events, mut rx) = EventSink::channel();
        let receiver = fx
            .receiver()
            .with_events(events)
            .with_cancellation(token.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { receiver.serve(listener).await });

        // First peer sends the key and vanishes mid-announcement
        let mut broken = TcpStream::connect(addr).await.unwrap();
        let key = SessionKey::generate().unwrap();
        broken
            .write_all(format!("{}\na.txt\n", key.encode()).as_bytes())
            .await
            .unwrap();
        drop(broken);

        let stream = TcpStream::connect(addr).await.unwrap();
        let sender = Sender::new(fx.config());
        sender.send(stream, &[path]).await.unwrap();

        // Wait until the second connection has been fully handled
        loop {
            match rx.recv().await.unwrap() {
                TransferEvent::ConnectionClosed { received: 1 } => break,
                _ => continue,
            }
        }
        token.cancel();
        server.await.unwrap().unwrap();

        assert_eq!(fs::read(fx.dest.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_serve_stops_when_cancelled() {
        let fx = Fixture::new();
        let token = CancellationToken::new();
        let receiver = fx.receiver().with_cancellation(token.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        token.cancel();
        receiver.serve(listener).await.unwrap();
    }
}
