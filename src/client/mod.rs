//! # Transfer Client
//!
//! Requester side of the protocol. Every operation picks a fresh random
//! transfer id and, for reads and writes, fresh key material that travels in
//! the opening request.
//!
//! - **upload**: the opening Write request and every chunk go through the
//!   [`ReliabilityEngine`], one acknowledged packet at a time.
//! - **download**: the opening Read request is delivered reliably; the data
//!   stream that follows is drained without retransmission and ends at the
//!   chunk marked final. Gaps and undecryptable chunks are counted in the
//!   [`TransferReport`].
//! - **delete**: a single reliable request.
//!
//! ## Example
//! ```rust,no_run
//! use udp_file_transfer::client::TransferClient;
//! use udp_file_transfer::config::TransferConfig;
//! use std::path::{Path, PathBuf};
//!
//! # async fn run() -> udp_file_transfer::error::Result<()> {
//! let config = TransferConfig::default();
//! let mut client = TransferClient::bind(&config.client, &config.transport).await?;
//! client.upload(Path::new("report.pdf"), "report.pdf").await?;
//! client.download("report.pdf", Path::new("copy.pdf")).await?;
//! client.delete("report.pdf").await?;
//! # Ok(())
//! # }
//! ```

pub mod reliability;

use crate::config::{partition_warnings, ClientConfig, TransportConfig};
use crate::core::codec::PacketCodec;
use crate::core::message::{Chunk, Message};
use crate::core::packet::{OpCode, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{CipherSuite, KeyMaterial, SessionCipher};
use crate::utils::io::{chunk_count, read_chunk};
use crate::utils::metrics::{Metrics, Timer};
use futures::StreamExt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, instrument, warn};

pub use reliability::{AckState, ReliabilityEngine};

/// Summary of a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub name: String,
    pub bytes: u64,
    pub chunks: u32,
    /// Chunks dropped on a failed integrity check or decryption.
    pub discarded: u32,
    /// Sequence numbers never seen.
    pub missing: u32,
}

impl TransferReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// True when every chunk arrived intact.
    pub fn is_complete(&self) -> bool {
        self.discarded == 0 && self.missing == 0
    }
}

pub struct TransferClient {
    framed: UdpFramed<PacketCodec>,
    server: SocketAddr,
    engine: ReliabilityEngine,
    suite: CipherSuite,
    transfer_unit: usize,
    drain_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl TransferClient {
    /// Bind a local socket for talking to `config.server_address`.
    #[instrument(skip_all, fields(server = %config.server_address))]
    pub async fn bind(config: &ClientConfig, transport: &TransportConfig) -> Result<Self> {
        let (_, errors) = partition_warnings(transport.validate());
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }

        let server = tokio::net::lookup_host(&config.server_address)
            .await?
            .next()
            .ok_or_else(|| {
                ProtocolError::ConfigError(format!(
                    "Server address did not resolve: {}",
                    config.server_address
                ))
            })?;
        let socket = UdpSocket::bind(&config.bind_address).await?;
        debug!(local = %socket.local_addr()?, "Client socket bound");

        let metrics = Arc::new(Metrics::new());
        Ok(Self {
            framed: UdpFramed::new(socket, PacketCodec),
            server,
            engine: ReliabilityEngine::from_config(config, metrics.clone()),
            suite: transport.cipher_suite,
            transfer_unit: transport.transfer_unit,
            drain_timeout: config.drain_timeout,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.framed.get_ref().local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Fetch `name` from the server into `dest`.
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn download(&mut self, name: &str, dest: &Path) -> Result<TransferReport> {
        let _timer = Timer::start("download");
        let transfer_id = rand::random::<u32>();
        let keys = KeyMaterial::generate(self.suite)?;
        let cipher = SessionCipher::new(&keys);

        let request = Message::Read {
            name: name.to_owned(),
            keys,
        }
        .into_packet(transfer_id)?;
        let first = self
            .engine
            .exchange(&mut self.framed, self.server, &request, |reply| {
                matches!(reply.operation, OpCode::Ack | OpCode::Error)
            })
            .await?;

        let pending = if first.is_data() {
            Some(first)
        } else {
            expect_ack(&first, name)?;
            None
        };

        // The destination is only replaced once the final chunk has arrived.
        let partial = partial_download_path(dest, transfer_id);
        let out = File::create(&partial)
            .await
            .map_err(|source| ProtocolError::FileCreateFailed {
                path: partial.display().to_string(),
                source,
            })?;

        let report = match self
            .drain_download(transfer_id, name, &cipher, pending, out)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                discard_partial(&partial).await;
                return Err(e);
            }
        };
        if let Err(source) = tokio::fs::rename(&partial, dest).await {
            discard_partial(&partial).await;
            return Err(ProtocolError::FileCreateFailed {
                path: dest.display().to_string(),
                source,
            });
        }

        if report.is_complete() {
            info!(bytes = report.bytes, chunks = report.chunks, "Download complete");
        } else {
            warn!(
                bytes = report.bytes,
                discarded = report.discarded,
                missing = report.missing,
                "Download finished with gaps"
            );
        }
        Ok(report)
    }

    /// Write the chunk stream of `transfer_id` into `out` up to the final chunk.
    async fn drain_download(
        &mut self,
        transfer_id: u32,
        name: &str,
        cipher: &SessionCipher,
        mut pending: Option<Packet>,
        mut out: File,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::new(name);
        let mut next_expected: u32 = 1;

        loop {
            let packet = match pending.take() {
                Some(packet) => packet,
                None => self.next_from_server(transfer_id, &report).await?,
            };

            let chunk = match Message::from_packet(&packet) {
                Ok(Message::ReadData(chunk)) => chunk,
                Ok(Message::Error { reason }) => return Err(remote_error(reason, name)),
                Ok(other) => {
                    debug!(op = other.operation().name(), "Ignoring packet during download");
                    continue;
                }
                Err(e) => {
                    self.metrics.integrity_failure();
                    report.discarded += 1;
                    warn!(error = %e, sequence = packet.sequence, "Chunk discarded");
                    continue;
                }
            };

            if chunk.sequence < next_expected {
                self.metrics.duplicate_chunk();
                continue;
            }
            if chunk.sequence > next_expected {
                let gap = chunk.sequence - next_expected;
                report.missing += gap;
                warn!(expected = next_expected, got = chunk.sequence, "Sequence gap in download");
            }
            next_expected = chunk.sequence.saturating_add(1);

            match cipher.open(chunk.sequence, &chunk.sealed) {
                Ok(plaintext) => {
                    out.write_all(&plaintext).await?;
                    report.bytes += plaintext.len() as u64;
                    report.chunks += 1;
                    self.metrics.file_bytes(plaintext.len() as u64);
                }
                Err(e) => {
                    self.metrics.decrypt_failure();
                    report.discarded += 1;
                    warn!(error = %e, sequence = chunk.sequence, "Chunk discarded");
                }
            }

            if chunk.last {
                break;
            }
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(report)
    }

    /// Send `source` to the server, stored as `name`.
    #[instrument(skip(self, source), fields(source = %source.display()))]
    pub async fn upload(&mut self, source: &Path, name: &str) -> Result<TransferReport> {
        let _timer = Timer::start("upload");
        let mut file = match File::open(source).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProtocolError::FileNotFound(source.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let total = file.metadata().await?.len();
        let chunks = u32::try_from(chunk_count(total, self.transfer_unit)).map_err(|_| {
            ProtocolError::Custom(format!("File too large to transfer: {}", source.display()))
        })?;

        let transfer_id = rand::random::<u32>();
        let keys = KeyMaterial::generate(self.suite)?;
        let cipher = SessionCipher::new(&keys);

        let request = Message::Write {
            name: name.to_owned(),
            keys,
        }
        .into_packet(transfer_id)?;
        let reply = self
            .engine
            .exchange(&mut self.framed, self.server, &request, |reply| {
                is_reply_to(reply, 0)
            })
            .await?;
        expect_ack(&reply, name)?;
        info!(file = name, bytes = total, chunks, "Uploading");

        let mut report = TransferReport::new(name);
        let mut buf = vec![0u8; self.transfer_unit];
        for sequence in 1..=chunks {
            let n = read_chunk(&mut file, &mut buf).await?;
            let packet = Message::WriteData {
                name: name.to_owned(),
                chunk: Chunk {
                    sequence,
                    last: sequence == chunks,
                    sealed: cipher.seal(sequence, &buf[..n])?,
                },
            }
            .into_packet(transfer_id)?;

            let reply = self
                .engine
                .exchange(&mut self.framed, self.server, &packet, |reply| {
                    is_reply_to(reply, sequence)
                })
                .await?;
            expect_ack(&reply, name)?;

            report.bytes += n as u64;
            report.chunks += 1;
            self.metrics.file_bytes(n as u64);
        }

        info!(bytes = report.bytes, chunks = report.chunks, "Upload complete");
        Ok(report)
    }

    /// Remove `name` from the server; returns the server's confirmation.
    #[instrument(skip(self))]
    pub async fn delete(&mut self, name: &str) -> Result<String> {
        let transfer_id = rand::random::<u32>();
        let request = Message::Delete {
            name: name.to_owned(),
        }
        .into_packet(transfer_id)?;
        let reply = self
            .engine
            .exchange(&mut self.framed, self.server, &request, |reply| {
                is_reply_to(reply, 0)
            })
            .await?;

        match Message::from_packet(&reply)? {
            Message::Ack { note, .. } => {
                info!(file = name, "Deleted");
                Ok(note)
            }
            Message::Error { reason } => Err(ProtocolError::FileDeleteFailed {
                path: name.to_owned(),
                reason,
            }),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Next packet of `transfer_id` from the server, bounded by the drain timeout.
    async fn next_from_server(&mut self, transfer_id: u32, report: &TransferReport) -> Result<Packet> {
        loop {
            let received = match tokio::time::timeout(self.drain_timeout, self.framed.next()).await
            {
                Ok(Some(received)) => received,
                Ok(None) => return Err(ProtocolError::Custom("Transport closed".to_string())),
                Err(_) => {
                    return Err(ProtocolError::TransferIncomplete(format!(
                        "no final chunk after {} chunks ({} bytes)",
                        report.chunks, report.bytes
                    )))
                }
            };

            match received {
                Ok((packet, from)) if from == self.server && packet.transfer_id == transfer_id => {
                    self.metrics.packet_received();
                    return Ok(packet);
                }
                Ok((packet, from)) => {
                    debug!(%from, transfer_id = packet.transfer_id, "Ignoring unrelated packet");
                }
                Err(e) => {
                    self.metrics.malformed_packet();
                    warn!(error = %e, "Discarding undecodable packet");
                }
            }
        }
    }
}

/// Hidden sibling of `dest` that receives a download in progress.
fn partial_download_path(dest: &Path, transfer_id: u32) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{file_name}.{transfer_id:08x}.part"))
}

async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(error = %e, path = %partial.display(), "Failed to remove partial download");
        }
    }
}

/// Ack for `sequence`, or any Error for the transfer.
fn is_reply_to(reply: &Packet, sequence: u32) -> bool {
    match reply.operation {
        OpCode::Error => true,
        OpCode::Ack => !reply.is_data() && reply.sequence == sequence,
        _ => false,
    }
}

fn expect_ack(reply: &Packet, name: &str) -> Result<()> {
    match Message::from_packet(reply)? {
        Message::Ack { .. } => Ok(()),
        Message::Error { reason } => Err(remote_error(reason, name)),
        _ => Err(ProtocolError::UnexpectedMessage),
    }
}

fn remote_error(reason: String, name: &str) -> ProtocolError {
    match reason.as_str() {
        constants::MSG_FILE_NOT_FOUND => ProtocolError::FileNotFound(name.to_owned()),
        constants::MSG_SERVER_BUSY => ProtocolError::ServerBusy,
        constants::MSG_FILE_IN_USE => ProtocolError::FileInUse(name.to_owned()),
        _ => ProtocolError::Remote(reason),
    }
}
