//! # File Server
//!
//! One UDP socket, one dispatch loop, many sessions.
//!
//! The dispatcher reads every datagram, decodes it, and routes it by
//! `(peer, transfer_id)`:
//!
//! - packets of a running transfer go to that session's queue;
//! - late retransmits of a finished transfer get its cached final response;
//! - an opening request (Read/Write/Delete at sequence 0) spawns a session,
//!   provided a session slot is free;
//! - anything else is logged and dropped.
//!
//! Sessions run concurrently in a [`JoinSet`], bounded by a [`Semaphore`].
//! Malformed input never stops the loop.
//!
//! ## Example
//! ```rust,no_run
//! use udp_file_transfer::config::TransferConfig;
//! use udp_file_transfer::server::FileServer;
//!
//! # async fn run() -> udp_file_transfer::error::Result<()> {
//! let config = TransferConfig::default();
//! let server = FileServer::bind(&config.server, &config.transport).await?;
//! server.run().await
//! # }
//! ```

pub mod session;
pub mod storage;

use crate::config::{ServerConfig, TransferConfig, TransportConfig};
use crate::core::message::Message;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::completion_cache::{CacheKey, CompletionCache};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout;
use session::{Session, SessionContext, SessionOutcome, SessionSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storage::Storage;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Receive buffer size; anything longer than a packet is truncated and
/// ignored past [`WIRE_SIZE`](crate::core::packet::WIRE_SIZE).
const RECV_BUFFER: usize = 2048;

pub struct FileServer {
    ctx: SessionContext,
    config: ServerConfig,
}

impl FileServer {
    /// Provision storage and bind the server socket.
    #[instrument(skip_all, fields(address = %config.address))]
    pub async fn bind(config: &ServerConfig, transport: &TransportConfig) -> Result<Self> {
        let storage = Arc::new(Storage::new(config));
        storage.provision().await?;

        let socket = UdpSocket::bind(&config.address).await?;
        info!(address = %socket.local_addr()?, "Listening");

        Ok(Self {
            ctx: SessionContext {
                socket: Arc::new(socket),
                storage,
                metrics: Arc::new(Metrics::new()),
                settings: SessionSettings::new(config, transport),
            },
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.ctx.socket.local_addr()?)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.ctx.metrics.clone()
    }

    pub fn storage(&self) -> Arc<Storage> {
        self.ctx.storage.clone()
    }

    /// Serve until CTRL+C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx_clone.send(()).await;
            }
        });

        let result = self.run_with_shutdown(shutdown_rx).await;
        drop(shutdown_tx);
        result
    }

    /// Serve until `shutdown_rx` fires or its sender is dropped.
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut dispatcher = Dispatcher::new(self.ctx, &self.config);
        let mut buf = vec![0u8; RECV_BUFFER];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    dispatcher.shutdown(self.config.shutdown_timeout).await;
                    return Ok(());
                }

                Some(joined) = dispatcher.sessions.join_next(), if !dispatcher.sessions.is_empty() => {
                    match joined {
                        Ok(outcome) => dispatcher.finish(outcome),
                        Err(e) => {
                            error!(error = %e, "Session task failed");
                            dispatcher.prune_routes();
                        }
                    }
                }

                received = dispatcher.ctx.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => dispatcher.handle_datagram(&buf[..len], peer).await,
                        Err(e) => warn!(error = %e, "Receive failed"),
                    }
                }
            }
        }
    }
}

/// Bind and serve `config` until CTRL+C.
pub async fn start_server(config: &TransferConfig) -> Result<()> {
    FileServer::bind(&config.server, &config.transport)
        .await?
        .run()
        .await
}

/// Like [`start_server`], stopping when `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    config: &TransferConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    FileServer::bind(&config.server, &config.transport)
        .await?
        .run_with_shutdown(shutdown_rx)
        .await
}

/// State owned by the dispatch loop.
struct Dispatcher {
    ctx: SessionContext,
    routes: HashMap<CacheKey, mpsc::Sender<Packet>>,
    sessions: JoinSet<SessionOutcome>,
    permits: Arc<Semaphore>,
    completed: CompletionCache,
    queue_depth: usize,
}

impl Dispatcher {
    fn new(ctx: SessionContext, config: &ServerConfig) -> Self {
        Self {
            ctx,
            routes: HashMap::new(),
            sessions: JoinSet::new(),
            permits: Arc::new(Semaphore::new(config.max_sessions)),
            completed: CompletionCache::with_settings(
                config.completion_ttl,
                config.completion_cache_size,
            ),
            queue_depth: config.session_queue.max(1),
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) {
        self.ctx.metrics.packet_received();

        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(ProtocolError::UnknownOperation(code)) => {
                self.ctx.metrics.malformed_packet();
                error!(%peer, code, "Unknown operation");
                let transfer_id = Packet::peek_transfer_id(datagram).unwrap_or_default();
                self.reply_error(peer, transfer_id, constants::MSG_UNKNOWN_OPERATION)
                    .await;
                return;
            }
            Err(e) => {
                self.ctx.metrics.malformed_packet();
                warn!(%peer, len = datagram.len(), error = %e, "Dropping malformed datagram");
                return;
            }
        };

        let key = CacheKey {
            peer,
            transfer_id: packet.transfer_id,
        };

        let packet = match self.routes.get(&key) {
            Some(queue) => match queue.try_send(packet) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    warn!(%peer, transfer_id = key.transfer_id, "Session queue full, dropping packet");
                    return;
                }
                Err(TrySendError::Closed(packet)) => {
                    self.routes.remove(&key);
                    packet
                }
            },
            None => packet,
        };

        if let Some(response) = self.completed.lookup(peer, packet.transfer_id) {
            debug!(%peer, transfer_id = key.transfer_id, "Replaying final response");
            self.send_raw(&response, peer).await;
            return;
        }

        if !packet.operation.is_request() {
            debug!(
                %peer,
                op = packet.operation.name(),
                "Dropping reply with no matching transfer"
            );
            return;
        }
        if packet.sequence != 0 || packet.is_data() {
            debug!(%peer, sequence = packet.sequence, "Dropping chunk with no matching transfer");
            return;
        }

        if let Err(e) = packet.verify_integrity() {
            self.ctx.metrics.integrity_failure();
            warn!(%peer, error = %e, "Dropping corrupt request");
            return;
        }

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.ctx.metrics.request_rejected();
                warn!(%peer, "Session limit reached, rejecting request");
                self.reply_error(peer, packet.transfer_id, constants::MSG_SERVER_BUSY)
                    .await;
                return;
            }
        };

        let (queue, inbox) = mpsc::channel(self.queue_depth);
        self.routes.insert(key, queue);

        let session = Session::new(self.ctx.clone(), peer, packet.transfer_id, inbox);
        self.sessions.spawn(async move {
            let outcome = session.run(packet).await;
            drop(permit);
            outcome
        });
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        let key = CacheKey {
            peer: outcome.peer,
            transfer_id: outcome.transfer_id,
        };
        self.routes.remove(&key);
        if let Some(response) = outcome.final_response {
            self.completed.record(outcome.peer, outcome.transfer_id, response);
        }
        debug!(
            peer = %outcome.peer,
            transfer_id = outcome.transfer_id,
            failed = outcome.failed,
            "Session finished"
        );
    }

    /// Forget routes whose session is gone.
    fn prune_routes(&mut self) {
        self.routes.retain(|_, queue| !queue.is_closed());
    }

    async fn reply_error(&self, peer: SocketAddr, transfer_id: u32, reason: &str) {
        match (Message::Error {
            reason: reason.to_string(),
        })
        .into_packet(transfer_id)
        {
            Ok(packet) => self.send_raw(&packet, peer).await,
            Err(e) => error!(error = %e, "Failed to build error reply"),
        }
    }

    async fn send_raw(&self, packet: &Packet, peer: SocketAddr) {
        match self.ctx.socket.send_to(&packet.to_bytes(), peer).await {
            Ok(_) => self.ctx.metrics.packet_sent(),
            Err(e) => warn!(%peer, error = %e, "Failed to send reply"),
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        info!(
            sessions = self.sessions.len(),
            "Shutting down server. Waiting for sessions to finish..."
        );
        self.routes.clear();

        let drain = async {
            while let Some(joined) = self.sessions.join_next().await {
                if let Ok(outcome) = joined {
                    debug!(peer = %outcome.peer, failed = outcome.failed, "Session closed");
                }
            }
        };
        let drained = with_timeout(drain, grace).await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, aborting sessions");
            self.sessions.abort_all();
        }
        self.ctx.metrics.log_metrics();
        info!("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::core::packet::{OpCode, WIRE_SIZE};

    async fn spawn_server(
        max_sessions: usize,
    ) -> (tempfile::TempDir, SocketAddr, mpsc::Sender<()>) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            storage_root: dir.path().join("files"),
            backup_dir: dir.path().join("backup"),
            max_sessions,
            ..ServerConfig::default()
        };
        let server = FileServer::bind(&config, &TransportConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(server.run_with_shutdown(rx));
        (dir, addr, tx)
    }

    async fn exchange(socket: &UdpSocket, addr: SocketAddr, bytes: &[u8]) -> Packet {
        socket.send_to(bytes, addr).await.unwrap();
        let mut buf = [0u8; WIRE_SIZE];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("reply expected")
            .unwrap();
        Packet::from_bytes(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_operation_gets_error_reply() {
        let (_dir, addr, _shutdown) = spawn_server(4).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut bytes = Packet::new(OpCode::Read, 77, 0).to_bytes();
        bytes[..4].copy_from_slice(&9u32.to_be_bytes());

        let reply = exchange(&client, addr, &bytes).await;
        assert_eq!(reply.operation, OpCode::Error);
        assert_eq!(reply.transfer_id, 77);
        assert_eq!(reply.payload, constants::MSG_UNKNOWN_OPERATION.as_bytes());
    }

    #[tokio::test]
    async fn test_delete_replay_served_from_cache() {
        let (dir, addr, _shutdown) = spawn_server(4).await;
        tokio::fs::write(dir.path().join("files/gone.txt"), b"x")
            .await
            .unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let request = Message::Delete {
            name: "gone.txt".into(),
        }
        .into_packet(5)
        .unwrap()
        .to_bytes();

        let first = exchange(&client, addr, &request).await;
        assert_eq!(first.operation, OpCode::Ack);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let replay = exchange(&client, addr, &request).await;
        assert_eq!(replay, first);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_server() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            storage_root: dir.path().join("files"),
            backup_dir: dir.path().join("backup"),
            ..ServerConfig::default()
        };
        let server = FileServer::bind(&config, &TransportConfig::default())
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(server.run_with_shutdown(rx));

        tx.send(()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
