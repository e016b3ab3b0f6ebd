//! # Error Types
//!
//! Error handling for the file transfer protocol.
//!
//! This module defines every error that can occur while moving a file over the
//! datagram transport, from a single malformed packet up to a failed session.
//!
//! ## Error Categories
//! - **Packet Errors**: malformed buffers, unknown operation codes
//! - **Integrity Errors**: checksum mismatches, failed decryption
//! - **Reliability Errors**: acknowledgment timeouts, incomplete downloads
//! - **Storage Errors**: missing files, create/delete failures, rejected names
//! - **Remote Errors**: failures reported by the peer in an Error packet
//!
//! Packet and integrity errors are scoped to one packet; the receive loops
//! log them and keep going. Storage errors end one session. Nothing here ends
//! the server's receive loop.
//!
//! ## Example Usage
//! ```rust
//! use udp_file_transfer::error::{ProtocolError, Result};
//! use udp_file_transfer::core::packet::Packet;
//! use tracing::warn;
//!
//! fn parse(datagram: &[u8]) -> Result<Packet> {
//!     match Packet::from_bytes(datagram) {
//!         Err(e) if e.is_packet_scoped() => {
//!             warn!(error = %e, "Dropping datagram");
//!             Err(e)
//!         }
//!         other => other,
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Packet validation errors
    pub const ERR_SHORT_PACKET: &str = "Datagram shorter than the fixed packet size";
    pub const ERR_NAME_NOT_UTF8: &str = "Target name is not valid UTF-8";
    pub const ERR_NAME_HAS_NUL: &str = "Target name contains a NUL byte";
    pub const ERR_NAME_TOO_LONG: &str = "Target name exceeds 255 bytes";
    pub const ERR_PAYLOAD_TOO_LARGE: &str = "Payload exceeds the packet capacity";
    pub const ERR_MISSING_NAME: &str = "Request packet carries no target name";
    pub const ERR_DATA_SEQUENCE: &str = "Data chunk carries sequence 0";
    pub const ERR_BAD_KEY_MATERIAL: &str = "Request carries malformed key material";
    pub const ERR_UNKNOWN_SUITE: &str = "Unknown cipher suite";

    /// Storage errors
    pub const ERR_EMPTY_NAME: &str = "File name is empty";
    pub const ERR_PATH_TRAVERSAL: &str = "File name escapes the storage root";

    /// Messages carried in Error packets
    pub const MSG_FILE_NOT_FOUND: &str = "Error: File not found.";
    pub const MSG_CREATE_FAILED: &str = "Error: Could not create file.";
    pub const MSG_DELETE_FAILED: &str = "Error: Failed to delete file.";
    pub const MSG_DELETE_MISSING: &str = "Error: File not found, nothing deleted.";
    pub const MSG_DELETE_OK: &str = "Success: File deleted.";
    pub const MSG_STORED: &str = "Success: File stored.";
    pub const MSG_UNKNOWN_OPERATION: &str = "Error: Unknown operation.";
    pub const MSG_UNEXPECTED: &str = "Error: Unexpected packet for a new request.";
    pub const MSG_SERVER_BUSY: &str = "Error: Server busy, try again later.";
    pub const MSG_SUITE_REJECTED: &str = "Error: Cipher suite not permitted.";
    pub const MSG_INVALID_NAME: &str = "Error: Invalid file name.";
    pub const MSG_FILE_IN_USE: &str = "Error: File is in use by another transfer.";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("Unknown operation code: {0}")]
    UnknownOperation(u32),

    #[error("Integrity check failed (expected {expected:#010x}, computed {actual:#010x})")]
    IntegrityMismatch { expected: u32, actual: u32 },

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("No acknowledgment after {attempts} attempts")]
    AckTimeout { attempts: u32 },

    #[error("Transfer incomplete: {0}")]
    TransferIncomplete(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Could not create file {path}: {source}")]
    FileCreateFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Could not delete file {path}: {reason}")]
    FileDeleteFailed { path: String, reason: String },

    #[error("Invalid file name {name:?}: {reason}")]
    InvalidFileName { name: String, reason: &'static str },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Server busy")]
    ServerBusy,

    #[error("File in use: {0}")]
    FileInUse(String),

    #[error("Unexpected message")]
    UnexpectedMessage,

    #[error("Cipher suite not permitted")]
    SuiteRejected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Server shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Errors that only invalidate the packet at hand; receive loops log them
    /// and continue with the next datagram.
    pub fn is_packet_scoped(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPacket(_)
                | ProtocolError::UnknownOperation(_)
                | ProtocolError::IntegrityMismatch { .. }
                | ProtocolError::DecryptionFailed
        )
    }

    /// True for decode-time failures (short buffers and unknown opcodes).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPacket(_) | ProtocolError::UnknownOperation(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
