//! Timeout defaults and async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// How long the requester waits for an acknowledgment before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Send attempts per packet before giving up.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Idle guard on the download drain loop.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server sessions with no inbound packet for this long are abandoned.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight sessions on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long final responses stay available for late retransmits.
pub const COMPLETION_TTL: Duration = Duration::from_secs(60);

/// Await `fut`, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}
