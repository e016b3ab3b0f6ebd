//! # UDP File Transfer
//!
//! Reliable, encrypted file transfer over UDP.
//!
//! A client reads, writes, or deletes named files on a server. Every datagram
//! is a fixed-size [`Packet`](core::packet::Packet) whose payload is covered by
//! a CRC-32 integrity code. File content travels in numbered chunks, each
//! sealed with XChaCha20-Poly1305 under key material the requester generates
//! once per transfer. Reliability is stop-and-wait: the requester retransmits
//! a packet until the matching acknowledgment arrives or the attempts run out.
//!
//! ## Architecture
//! - **core**: wire packet, datagram codec, typed messages
//! - **server**: dispatch loop, per-transfer sessions, confined storage
//! - **client**: reliability engine and transfer operations
//! - **utils**: checksum, crypto, metrics, logging, timeouts
//! - **config**: TOML + environment configuration with validation
//!
//! ## Quick Start
//! ```rust,no_run
//! use udp_file_transfer::config::TransferConfig;
//! use udp_file_transfer::client::TransferClient;
//! use udp_file_transfer::server::FileServer;
//! use std::path::Path;
//!
//! # async fn demo() -> udp_file_transfer::error::Result<()> {
//! let config = TransferConfig::default();
//! let server = FileServer::bind(&config.server, &config.transport).await?;
//! tokio::spawn(server.run());
//!
//! let mut client = TransferClient::bind(&config.client, &config.transport).await?;
//! client.upload(Path::new("notes.txt"), "notes.txt").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod server;
pub mod utils;

pub use client::{TransferClient, TransferReport};
pub use config::TransferConfig;
pub use error::{ProtocolError, Result};
pub use server::FileServer;
