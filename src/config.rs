//! # Configuration Management
//!
//! Centralized configuration for the file transfer server and client.
//!
//! This module provides structured configuration for both ends of a transfer:
//! bind and peer addresses, storage locations, acknowledgment timing, session
//! limits, cipher selection, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`UDPFT_*`)
//!
//! ## Security Considerations
//! - XChaCha20-Poly1305 is the default suite; the legacy XOR transform must be
//!   enabled explicitly on the server
//! - `max_sessions` bounds the worker pool so a burst of requests is refused
//!   instead of spawning without limit

use crate::core::packet::TRANSFER_UNIT;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::CipherSuite;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Well-known server port
pub const DEFAULT_PORT: u16 = 12345;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TransferConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `UDPFT_*` environment variables; unparsable
    /// values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("UDPFT_SERVER_ADDRESS") {
            self.server.address = addr.clone();
            self.client.server_address = addr;
        }

        if let Ok(root) = std::env::var("UDPFT_STORAGE_ROOT") {
            self.server.storage_root = PathBuf::from(root);
        }

        if let Ok(limit) = std::env::var("UDPFT_MAX_SESSIONS") {
            if let Ok(val) = limit.parse::<usize>() {
                self.server.max_sessions = val;
            }
        }

        if let Ok(timeout) = std::env::var("UDPFT_ACK_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.client.ack_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(attempts) = std::env::var("UDPFT_MAX_ATTEMPTS") {
            if let Ok(val) = attempts.parse::<u32>() {
                self.client.max_attempts = val;
            }
        }

        if let Ok(suite) = std::env::var("UDPFT_CIPHER_SUITE") {
            match suite.to_ascii_lowercase().as_str() {
                "xchacha20poly1305" => self.transport.cipher_suite = CipherSuite::XChaCha20Poly1305,
                "xor" => self.transport.cipher_suite = CipherSuite::Xor,
                _ => {}
            }
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate only the sections a client reads (client, transport, logging).
    pub fn validate_client(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Split validation output into advisory warnings and hard errors.
pub fn partition_warnings(messages: Vec<String>) -> (Vec<String>, Vec<String>) {
    messages
        .into_iter()
        .partition(|msg| msg.starts_with("WARNING"))
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:12345")
    pub address: String,

    /// Directory files are served from and written to
    pub storage_root: PathBuf,

    /// Directory previous versions are moved to when a file is overwritten
    pub backup_dir: PathBuf,

    /// Keep the previous version of a file on upload instead of replacing it
    pub keep_versions: bool,

    /// Maximum number of concurrently running sessions
    pub max_sessions: usize,

    /// Packets buffered per session before the dispatcher drops extras
    pub session_queue: usize,

    /// Sessions with no inbound packet for this long are abandoned
    #[serde(with = "duration_serde")]
    pub session_idle_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How long final responses are kept for late retransmits
    #[serde(with = "duration_serde")]
    pub completion_ttl: Duration,

    /// Maximum number of cached final responses
    pub completion_cache_size: usize,

    /// Pause between streamed download chunks (zero to disable)
    #[serde(with = "duration_serde")]
    pub chunk_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            storage_root: PathBuf::from("./server_files"),
            backup_dir: PathBuf::from("./backup_files"),
            keep_versions: true,
            max_sessions: 64,
            session_queue: 32,
            session_idle_timeout: timeout::SESSION_IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            completion_ttl: timeout::COMPLETION_TTL,
            completion_cache_size: 1024,
            chunk_interval: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:12345')",
                self.address
            ));
        }

        if self.storage_root.as_os_str().is_empty() {
            errors.push("Storage root cannot be empty".to_string());
        }

        if self.keep_versions && self.backup_dir.as_os_str().is_empty() {
            errors.push("Backup directory cannot be empty when keep_versions is true".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 100_000 {
            errors.push(format!(
                "Max sessions very high: {} (ensure system resources can support this)",
                self.max_sessions
            ));
        }

        if self.session_queue == 0 {
            errors.push("Session queue must be greater than 0".to_string());
        }

        if self.session_idle_timeout.as_millis() < 100 {
            errors.push("Session idle timeout too short (minimum: 100ms)".to_string());
        } else if self.session_idle_timeout.as_secs() > 3600 {
            errors.push("Session idle timeout too long (maximum: 1 hour)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.completion_cache_size == 0 {
            errors.push("Completion cache size must be greater than 0".to_string());
        }

        if self.chunk_interval.as_secs() > 1 {
            errors.push("Chunk interval too long (maximum: 1s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub server_address: String,

    /// Local bind address (port 0 for an ephemeral port)
    pub bind_address: String,

    /// Wait for an acknowledgment before retransmitting
    #[serde(with = "duration_serde")]
    pub ack_timeout: Duration,

    /// Send attempts per packet before reporting an acknowledgment timeout
    pub max_attempts: u32,

    /// Idle guard on the download receive loop
    #[serde(with = "duration_serde")]
    pub drain_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            bind_address: String::from("0.0.0.0:0"),
            ack_timeout: timeout::ACK_TIMEOUT,
            max_attempts: timeout::MAX_SEND_ATTEMPTS,
            drain_timeout: timeout::DRAIN_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.server_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '127.0.0.1:12345')",
                self.server_address
            ));
        }

        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address format: '{}' (expected format: '0.0.0.0:0')",
                self.bind_address
            ));
        }

        if self.ack_timeout.as_millis() < 10 {
            errors.push("Ack timeout too short (minimum: 10ms)".to_string());
        } else if self.ack_timeout.as_secs() > 60 {
            errors.push("Ack timeout too long (maximum: 60s)".to_string());
        }

        if self.max_attempts == 0 {
            errors.push("Max attempts must be greater than 0".to_string());
        } else if self.max_attempts > 100 {
            errors.push(format!(
                "Max attempts too high: {} (maximum: 100)",
                self.max_attempts
            ));
        }

        if self.drain_timeout < self.ack_timeout {
            errors.push("Drain timeout cannot be shorter than the ack timeout".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Suite the client uses for new transfers
    pub cipher_suite: CipherSuite,

    /// Whether the server accepts transfers using the legacy XOR transform
    pub allow_legacy_xor: bool,

    /// Plaintext bytes per chunk
    pub transfer_unit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            cipher_suite: CipherSuite::default(),
            allow_legacy_xor: false,
            transfer_unit: TRANSFER_UNIT,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.transfer_unit == 0 {
            errors.push("Transfer unit cannot be 0".to_string());
        } else if self.transfer_unit > TRANSFER_UNIT {
            errors.push(format!(
                "Transfer unit too large: {} bytes (maximum: {TRANSFER_UNIT})",
                self.transfer_unit
            ));
        }

        if self.cipher_suite == CipherSuite::Xor {
            errors.push(
                "WARNING: Legacy XOR transform selected - provides no confidentiality".to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Console log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to append events to a log file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Minimum level written to the log file
    #[serde(with = "log_level_serde")]
    pub file_log_level: Level,

    /// Whether to use JSON formatting for console logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("udp-file-transfer"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: Some(String::from("server_error.log")),
            file_log_level: Level::ERROR,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
