//! # Utility Modules
//!
//! Supporting utilities for integrity, cryptography, logging, and timing.
//!
//! ## Components
//! - **Checksum**: CRC-32 integrity codes over packet payloads
//! - **Crypto**: per-transfer XChaCha20-Poly1305 sealing, legacy XOR transform
//! - **Completion Cache**: final responses kept for late retransmits
//! - **IO**: chunk-sized reads from async sources
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Timeout defaults and async wrappers
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for key material (zeroize crate)

pub mod checksum;
pub mod completion_cache;
pub mod crypto;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use completion_cache::{CacheKey, CompletionCache};
