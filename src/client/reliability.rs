//! Stop-and-wait delivery.
//!
//! [`ReliabilityEngine::exchange`] sends one packet, waits a fixed timeout
//! for a matching reply, and retransmits the identical bytes until it gets
//! one or runs out of attempts. There is no backoff.
//!
//! A reply matches when it comes from the peer, carries the same transfer id,
//! passes its integrity check, and satisfies the caller's predicate. Anything
//! else is ignored and does not extend the deadline.

use crate::config::ClientConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// Acknowledgment state of the packet in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Idle,
    Sent { attempt: u32 },
    Acked,
    TimedOut { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct ReliabilityEngine {
    ack_timeout: Duration,
    max_attempts: u32,
    metrics: Arc<Metrics>,
}

impl ReliabilityEngine {
    pub fn new(ack_timeout: Duration, max_attempts: u32, metrics: Arc<Metrics>) -> Self {
        Self {
            ack_timeout,
            max_attempts: max_attempts.max(1),
            metrics,
        }
    }

    pub fn from_config(config: &ClientConfig, metrics: Arc<Metrics>) -> Self {
        Self::new(config.ack_timeout, config.max_attempts, metrics)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deliver `packet` to `peer` and return the first reply `accept` takes.
    #[instrument(
        skip_all,
        fields(op = packet.operation.name(), transfer_id = packet.transfer_id, sequence = packet.sequence)
    )]
    pub async fn exchange<T, F>(
        &self,
        transport: &mut T,
        peer: SocketAddr,
        packet: &Packet,
        mut accept: F,
    ) -> Result<Packet>
    where
        T: Sink<(Packet, SocketAddr), Error = ProtocolError>
            + Stream<Item = Result<(Packet, SocketAddr)>>
            + Unpin,
        F: FnMut(&Packet) -> bool,
    {
        let mut state = AckState::Idle;
        trace!(?state, "Starting exchange");

        for attempt in 1..=self.max_attempts {
            transport.send((packet.clone(), peer)).await?;
            self.metrics.packet_sent();
            if attempt > 1 {
                self.metrics.retransmission();
            }
            state = AckState::Sent { attempt };
            trace!(?state, "Packet sent");

            let deadline = Instant::now() + self.ack_timeout;
            loop {
                let received = match tokio::time::timeout_at(deadline, transport.next()).await {
                    Ok(Some(received)) => received,
                    Ok(None) => {
                        return Err(ProtocolError::Custom("Transport closed".to_string()))
                    }
                    Err(_) => break,
                };

                let (reply, from) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Discarding undecodable reply");
                        continue;
                    }
                };
                self.metrics.packet_received();

                if from != peer || reply.transfer_id != packet.transfer_id {
                    debug!(%from, transfer_id = reply.transfer_id, "Ignoring unrelated packet");
                    continue;
                }
                if let Err(e) = reply.verify_integrity() {
                    self.metrics.integrity_failure();
                    warn!(error = %e, "Discarding corrupt reply");
                    continue;
                }
                if !accept(&reply) {
                    debug!(
                        op = reply.operation.name(),
                        sequence = reply.sequence,
                        "Ignoring stale reply"
                    );
                    continue;
                }

                state = AckState::Acked;
                trace!(?state, "Reply accepted");
                return Ok(reply);
            }

            state = AckState::TimedOut { attempt };
            debug!(?state, "No acknowledgment before timeout");
        }

        self.metrics.ack_timeout();
        warn!(attempts = self.max_attempts, "Giving up");
        Err(ProtocolError::AckTimeout {
            attempts: self.max_attempts,
        })
    }
}
