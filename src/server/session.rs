//! Per-transfer server session.
//!
//! A session owns one `(peer, transfer_id)` pair from its opening request to
//! its final response. The dispatcher hands it the opening packet and then
//! forwards every later packet of the same transfer through a bounded queue.
//!
//! Uploads follow a skip-and-continue policy: a chunk that fails its checksum
//! or does not decrypt is dropped without an acknowledgment, so the requester
//! retransmits it. Chunks at or beyond the next expected sequence are written
//! in arrival order; anything older is a duplicate and only re-acknowledged.

use crate::config::{ServerConfig, TransportConfig};
use crate::core::message::{Chunk, Message};
use crate::core::packet::{OpCode, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::server::storage::Storage;
use crate::utils::crypto::{CipherSuite, KeyMaterial, SessionCipher};
use crate::utils::io::{chunk_count, read_chunk};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::with_timeout;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Knobs shared by every session of one server.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub chunk_interval: Duration,
    pub transfer_unit: usize,
    pub allow_legacy_xor: bool,
}

impl SessionSettings {
    pub fn new(server: &ServerConfig, transport: &TransportConfig) -> Self {
        Self {
            idle_timeout: server.session_idle_timeout,
            chunk_interval: server.chunk_interval,
            transfer_unit: transport.transfer_unit,
            allow_legacy_xor: transport.allow_legacy_xor,
        }
    }
}

/// Resources every session borrows from the server.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub socket: Arc<UdpSocket>,
    pub storage: Arc<Storage>,
    pub metrics: Arc<Metrics>,
    pub settings: SessionSettings,
}

/// What the dispatcher learns when a session ends.
#[derive(Debug)]
pub struct SessionOutcome {
    pub peer: SocketAddr,
    pub transfer_id: u32,
    /// Reply to replay for late retransmits of this transfer.
    pub final_response: Option<Packet>,
    pub failed: bool,
}

pub struct Session {
    ctx: SessionContext,
    peer: SocketAddr,
    transfer_id: u32,
    inbox: mpsc::Receiver<Packet>,
}

impl Session {
    pub fn new(
        ctx: SessionContext,
        peer: SocketAddr,
        transfer_id: u32,
        inbox: mpsc::Receiver<Packet>,
    ) -> Self {
        Self {
            ctx,
            peer,
            transfer_id,
            inbox,
        }
    }

    /// Serve the transfer opened by `request`.
    #[instrument(
        name = "session",
        skip(self, request),
        fields(peer = %self.peer, transfer_id = self.transfer_id, op = request.operation.name())
    )]
    pub async fn run(mut self, request: Packet) -> SessionOutcome {
        self.ctx.metrics.session_started();
        let _timer = Timer::start("session");

        let result = match Message::from_packet(&request) {
            Ok(Message::Read { name, keys }) => self.serve_read(&name, keys).await,
            Ok(Message::Write { name, keys }) => self.receive_write(&name, keys).await,
            Ok(Message::Delete { name }) => self.delete(&name).await,
            Ok(_) => Err(ProtocolError::UnexpectedMessage),
            Err(e) => Err(e),
        };

        let (final_response, failed) = match result {
            Ok(response) => (response, false),
            Err(e) => (self.fail(e).await, true),
        };
        self.ctx.metrics.session_finished(failed);

        SessionOutcome {
            peer: self.peer,
            transfer_id: self.transfer_id,
            final_response,
            failed,
        }
    }

    /// Report `e` to the peer where that still makes sense.
    async fn fail(&self, e: ProtocolError) -> Option<Packet> {
        let reason = match &e {
            ProtocolError::Timeout | ProtocolError::ShuttingDown => {
                warn!(error = %e, "Session abandoned");
                return None;
            }
            ProtocolError::FileNotFound(_) => constants::MSG_FILE_NOT_FOUND.to_string(),
            ProtocolError::FileCreateFailed { .. } => constants::MSG_CREATE_FAILED.to_string(),
            ProtocolError::FileDeleteFailed { reason, .. } => reason.clone(),
            ProtocolError::InvalidFileName { .. } => constants::MSG_INVALID_NAME.to_string(),
            ProtocolError::FileInUse(_) => constants::MSG_FILE_IN_USE.to_string(),
            ProtocolError::SuiteRejected => constants::MSG_SUITE_REJECTED.to_string(),
            ProtocolError::UnexpectedMessage => constants::MSG_UNEXPECTED.to_string(),
            other => format!("Error: {other}"),
        };
        error!(error = %e, "Session failed");

        match self.send(Message::Error { reason }).await {
            Ok(packet) => Some(packet),
            Err(send_err) => {
                error!(error = %send_err, "Failed to send error response");
                None
            }
        }
    }

    async fn send(&self, message: Message) -> Result<Packet> {
        let packet = message.into_packet(self.transfer_id)?;
        self.ctx
            .socket
            .send_to(&packet.to_bytes(), self.peer)
            .await?;
        self.ctx.metrics.packet_sent();
        Ok(packet)
    }

    fn ack(sequence: u32) -> Message {
        Message::Ack {
            sequence,
            note: String::new(),
        }
    }

    fn admit_suite(&self, keys: &KeyMaterial) -> Result<()> {
        if keys.suite() == CipherSuite::Xor && !self.ctx.settings.allow_legacy_xor {
            return Err(ProtocolError::SuiteRejected);
        }
        Ok(())
    }

    /// Stream `name` to the peer as sealed chunks. Reads are not cached for
    /// replay: a repeated request simply starts the stream again.
    async fn serve_read(&mut self, name: &str, keys: KeyMaterial) -> Result<Option<Packet>> {
        self.admit_suite(&keys)?;
        let path = self.ctx.storage.resolve(name)?;
        let _guard = self.ctx.storage.lock_shared(name)?;

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProtocolError::FileNotFound(name.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        let total = file.metadata().await?.len();
        let unit = self.ctx.settings.transfer_unit;
        let chunks = u32::try_from(chunk_count(total, unit))
            .map_err(|_| ProtocolError::Custom(format!("File too large to transfer: {name}")))?;

        let cipher = SessionCipher::new(&keys);
        self.send(Self::ack(0)).await?;
        info!(file = name, bytes = total, chunks, "Serving download");

        let mut buf = vec![0u8; unit];
        for sequence in 1..=chunks {
            let n = read_chunk(&mut file, &mut buf).await?;
            let last = sequence == chunks || n < unit;
            let sealed = cipher.seal(sequence, &buf[..n])?;
            self.send(Message::ReadData(Chunk {
                sequence,
                last,
                sealed,
            }))
            .await?;
            self.ctx.metrics.file_bytes(n as u64);

            if last {
                break;
            }
            if !self.ctx.settings.chunk_interval.is_zero() {
                tokio::time::sleep(self.ctx.settings.chunk_interval).await;
            }
        }

        info!(file = name, "Download served");
        Ok(None)
    }

    /// Receive chunks of `name` until a verified final chunk commits it.
    async fn receive_write(&mut self, name: &str, keys: KeyMaterial) -> Result<Option<Packet>> {
        self.admit_suite(&keys)?;
        self.ctx.storage.resolve(name)?;
        let _guard = self.ctx.storage.lock_exclusive(name)?;

        let partial = self.ctx.storage.partial_path(name, self.transfer_id)?;
        let file = File::create(&partial)
            .await
            .map_err(|source| ProtocolError::FileCreateFailed {
                path: name.to_owned(),
                source,
            })?;

        let cipher = SessionCipher::new(&keys);
        self.send(Self::ack(0)).await?;
        info!(file = name, "Receiving upload");

        let last = match self.collect_chunks(name, file, &cipher).await {
            Ok(last) => last,
            Err(e) => {
                self.ctx.storage.discard(&partial).await;
                return Err(e);
            }
        };

        match self.ctx.storage.commit(name, &partial).await {
            Ok(Some(previous)) => {
                info!(file = name, backup = %previous.display(), "Previous version backed up");
            }
            Ok(None) => {}
            Err(e) => {
                self.ctx.storage.discard(&partial).await;
                return Err(e);
            }
        }

        let reply = self
            .send(Message::Ack {
                sequence: last,
                note: constants::MSG_STORED.to_string(),
            })
            .await?;
        info!(file = name, "Upload stored");
        Ok(Some(reply))
    }

    /// Write chunks to `file` until the final one; returns its sequence.
    async fn collect_chunks(
        &mut self,
        name: &str,
        mut file: File,
        cipher: &SessionCipher,
    ) -> Result<u32> {
        let mut next_expected: u32 = 1;
        let mut written: u64 = 0;

        loop {
            let packet = with_timeout(self.inbox.recv(), self.ctx.settings.idle_timeout)
                .await?
                .ok_or(ProtocolError::ShuttingDown)?;

            if packet.operation == OpCode::Write && packet.sequence == 0 && !packet.is_data() {
                debug!("Repeated upload request, re-acknowledging");
                self.send(Self::ack(0)).await?;
                continue;
            }

            let chunk = match Message::from_packet(&packet) {
                Ok(Message::WriteData { chunk, .. }) => chunk,
                Ok(other) => {
                    debug!(op = other.operation().name(), "Ignoring packet during upload");
                    continue;
                }
                Err(e) => {
                    if matches!(e, ProtocolError::IntegrityMismatch { .. }) {
                        self.ctx.metrics.integrity_failure();
                    } else {
                        self.ctx.metrics.malformed_packet();
                    }
                    error!(error = %e, sequence = packet.sequence, file = name, "Chunk discarded");
                    continue;
                }
            };

            if chunk.sequence < next_expected {
                self.ctx.metrics.duplicate_chunk();
                debug!(sequence = chunk.sequence, "Duplicate chunk, re-acknowledging");
                self.send(Self::ack(chunk.sequence)).await?;
                continue;
            }

            let plaintext = match cipher.open(chunk.sequence, &chunk.sealed) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    self.ctx.metrics.decrypt_failure();
                    error!(error = %e, sequence = chunk.sequence, file = name, "Chunk discarded");
                    continue;
                }
            };

            if chunk.sequence > next_expected {
                warn!(
                    expected = next_expected,
                    got = chunk.sequence,
                    "Sequence gap in upload"
                );
            }

            file.write_all(&plaintext).await?;
            written += plaintext.len() as u64;
            self.ctx.metrics.file_bytes(plaintext.len() as u64);
            next_expected = chunk.sequence.saturating_add(1);

            if chunk.last {
                file.flush().await?;
                file.sync_all().await?;
                debug!(bytes = written, chunks = chunk.sequence, "Final chunk received");
                return Ok(chunk.sequence);
            }
            self.send(Self::ack(chunk.sequence)).await?;
        }
    }

    async fn delete(&mut self, name: &str) -> Result<Option<Packet>> {
        let path = self.ctx.storage.resolve(name)?;
        let _guard = self.ctx.storage.lock_exclusive(name)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(file = name, "File deleted");
                let reply = self
                    .send(Message::Ack {
                        sequence: 0,
                        note: constants::MSG_DELETE_OK.to_string(),
                    })
                    .await?;
                Ok(Some(reply))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ProtocolError::FileDeleteFailed {
                path: name.to_owned(),
                reason: constants::MSG_DELETE_MISSING.to_string(),
            }),
            Err(e) => Err(ProtocolError::FileDeleteFailed {
                path: name.to_owned(),
                reason: format!("{} ({e})", constants::MSG_DELETE_FAILED),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::core::packet::WIRE_SIZE;

    struct Harness {
        _dir: tempfile::TempDir,
        storage: Arc<Storage>,
        ctx: SessionContext,
        peer: UdpSocket,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_root: dir.path().join("files"),
            backup_dir: dir.path().join("backup"),
            ..ServerConfig::default()
        };
        let storage = Arc::new(Storage::new(&config));
        storage.provision().await.unwrap();

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut settings = SessionSettings::new(&config, &TransportConfig::default());
        settings.idle_timeout = Duration::from_secs(2);

        Harness {
            _dir: dir,
            storage: storage.clone(),
            ctx: SessionContext {
                socket,
                storage,
                metrics: Arc::new(Metrics::new()),
                settings,
            },
            peer,
        }
    }

    async fn recv(peer: &UdpSocket) -> Message {
        let mut buf = [0u8; WIRE_SIZE];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .expect("reply expected")
            .unwrap();
        Message::from_packet(&Packet::from_bytes(&buf[..n]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_delete_missing_reports_error() {
        let h = harness().await;
        let (_tx, rx) = mpsc::channel(4);
        let session = Session::new(h.ctx.clone(), h.peer.local_addr().unwrap(), 9, rx);
        let request = Message::Delete {
            name: "absent.txt".into(),
        }
        .into_packet(9)
        .unwrap();

        let outcome = session.run(request).await;
        assert!(outcome.failed);
        match recv(&h.peer).await {
            Message::Error { reason } => assert_eq!(reason, constants::MSG_DELETE_MISSING),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_legacy_suite_rejected_by_default() {
        let h = harness().await;
        let (_tx, rx) = mpsc::channel(4);
        let session = Session::new(h.ctx.clone(), h.peer.local_addr().unwrap(), 3, rx);
        let request = Message::Read {
            name: "any.txt".into(),
            keys: KeyMaterial::generate(CipherSuite::Xor).unwrap(),
        }
        .into_packet(3)
        .unwrap();

        let outcome = session.run(request).await;
        assert!(outcome.failed);
        assert!(matches!(recv(&h.peer).await, Message::Error { .. }));
    }

    #[tokio::test]
    async fn test_upload_skips_corrupt_chunk() {
        let h = harness().await;
        let (tx, rx) = mpsc::channel(8);
        let session = Session::new(h.ctx.clone(), h.peer.local_addr().unwrap(), 5, rx);
        let keys = KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap();
        let cipher = SessionCipher::new(&keys);
        let request = Message::Write {
            name: "up.bin".into(),
            keys,
        }
        .into_packet(5)
        .unwrap();
        let task = tokio::spawn(session.run(request));
        assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 0, .. }));

        let chunk = |sequence: u32, data: &[u8], last: bool| {
            Message::WriteData {
                name: "up.bin".into(),
                chunk: Chunk {
                    sequence,
                    last,
                    sealed: cipher.seal(sequence, data).unwrap(),
                },
            }
            .into_packet(5)
            .unwrap()
        };

        tx.send(chunk(1, b"aaaa", false)).await.unwrap();
        assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 1, .. }));

        let mut corrupt = chunk(2, b"bbbb", false);
        corrupt.payload[0] ^= 0xFF;
        tx.send(corrupt).await.unwrap();

        tx.send(chunk(3, b"cccc", true)).await.unwrap();
        assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 3, .. }));

        let outcome = task.await.unwrap();
        assert!(!outcome.failed);
        assert!(outcome.final_response.is_some());

        let stored = tokio::fs::read(h.storage.resolve("up.bin").unwrap())
            .await
            .unwrap();
        assert_eq!(stored, b"aaaacccc");
        assert_eq!(h.ctx.metrics.snapshot().integrity_failures, 1);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_reacked_not_rewritten() {
        let h = harness().await;
        let (tx, rx) = mpsc::channel(8);
        let session = Session::new(h.ctx.clone(), h.peer.local_addr().unwrap(), 6, rx);
        let keys = KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap();
        let cipher = SessionCipher::new(&keys);
        let request = Message::Write {
            name: "dup.bin".into(),
            keys,
        }
        .into_packet(6)
        .unwrap();
        let task = tokio::spawn(session.run(request));
        assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 0, .. }));

        let first = Message::WriteData {
            name: "dup.bin".into(),
            chunk: Chunk {
                sequence: 1,
                last: false,
                sealed: cipher.seal(1, b"once").unwrap(),
            },
        }
        .into_packet(6)
        .unwrap();
        for _ in 0..2 {
            tx.send(first.clone()).await.unwrap();
            assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 1, .. }));
        }

        let last = Message::WriteData {
            name: "dup.bin".into(),
            chunk: Chunk {
                sequence: 2,
                last: true,
                sealed: cipher.seal(2, b"!").unwrap(),
            },
        }
        .into_packet(6)
        .unwrap();
        tx.send(last).await.unwrap();
        assert!(matches!(recv(&h.peer).await, Message::Ack { sequence: 2, .. }));
        assert!(!task.await.unwrap().failed);

        let stored = tokio::fs::read(h.storage.resolve("dup.bin").unwrap())
            .await
            .unwrap();
        assert_eq!(stored, b"once!");
        assert_eq!(h.ctx.metrics.snapshot().duplicate_chunks, 1);
    }

    #[tokio::test]
    async fn test_idle_upload_removes_partial_file() {
        let mut h = harness().await;
        h.ctx.settings.idle_timeout = Duration::from_millis(100);
        let (_tx, rx) = mpsc::channel(8);
        let session = Session::new(h.ctx.clone(), h.peer.local_addr().unwrap(), 7, rx);
        let request = Message::Write {
            name: "idle.bin".into(),
            keys: KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap(),
        }
        .into_packet(7)
        .unwrap();

        let outcome = session.run(request).await;
        assert!(outcome.failed);
        assert!(outcome.final_response.is_none());
        assert!(!h.storage.partial_path("idle.bin", 7).unwrap().exists());
        assert!(!h.storage.resolve("idle.bin").unwrap().exists());
    }
}
