//! Observability and Metrics
//!
//! Counters for sessions, packets and the failure modes of the reliability
//! protocol (integrity mismatches, decrypt failures, retransmissions).
//!
//! Uses atomic counters for thread-safe metrics collection. Servers and
//! clients each own an `Arc<Metrics>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for transfer operations
#[derive(Debug)]
pub struct Metrics {
    /// Total sessions started
    pub sessions_total: AtomicU64,
    /// Currently running sessions
    pub sessions_active: AtomicU64,
    /// Sessions that ended in an error
    pub sessions_failed: AtomicU64,
    /// Requests refused because the session pool was full
    pub requests_rejected: AtomicU64,
    /// Total packets sent
    pub packets_sent: AtomicU64,
    /// Total packets received
    pub packets_received: AtomicU64,
    /// File bytes delivered to disk or to the peer
    pub file_bytes: AtomicU64,
    /// Datagrams that failed to decode
    pub malformed_packets: AtomicU64,
    /// Payloads discarded on checksum mismatch
    pub integrity_failures: AtomicU64,
    /// Payloads discarded on failed decryption
    pub decrypt_failures: AtomicU64,
    /// Duplicate chunks acknowledged but not written
    pub duplicate_chunks: AtomicU64,
    /// Packets sent again after an acknowledgment timeout
    pub retransmissions: AtomicU64,
    /// Requests abandoned after the last attempt
    pub ack_timeouts: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            file_bytes: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            decrypt_failures: AtomicU64::new(0),
            duplicate_chunks: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_started(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_finished(&self, failed: bool) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_bytes(&self, count: u64) {
        self.file_bytes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn malformed_packet(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_chunk(&self) {
        self.duplicate_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            file_bytes: self.file_bytes.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            duplicate_chunks: self.duplicate_chunks.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_total = snapshot.sessions_total,
            sessions_active = snapshot.sessions_active,
            sessions_failed = snapshot.sessions_failed,
            requests_rejected = snapshot.requests_rejected,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            file_bytes = snapshot.file_bytes,
            malformed_packets = snapshot.malformed_packets,
            integrity_failures = snapshot.integrity_failures,
            decrypt_failures = snapshot.decrypt_failures,
            duplicate_chunks = snapshot.duplicate_chunks,
            retransmissions = snapshot.retransmissions,
            ack_timeouts = snapshot.ack_timeouts,
            uptime_seconds = snapshot.uptime_seconds,
            "Transfer metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub sessions_failed: u64,
    pub requests_rejected: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub file_bytes: u64,
    pub malformed_packets: u64,
    pub integrity_failures: u64,
    pub decrypt_failures: u64,
    pub duplicate_chunks: u64,
    pub retransmissions: u64,
    pub ack_timeouts: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
