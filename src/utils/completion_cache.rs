//! Completion Cache for late retransmits
//!
//! When the last acknowledgment of a transfer is lost, the requester
//! retransmits a packet whose session has already ended. This cache keeps the
//! final response of recently finished transfers, keyed by peer and transfer
//! id, so the dispatcher can answer those retransmits without re-running the
//! operation.
//!
//! Entries expire after a TTL and the cache is bounded; the oldest entries are
//! evicted first.

use crate::core::packet::Packet;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Cache entry for a finished transfer
#[derive(Debug, Clone)]
struct CacheEntry {
    /// When this entry was added to the cache
    added_at: Instant,
    /// The response to resend
    response: Packet,
}

/// Key for cache entries - the same pair sessions are routed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub peer: SocketAddr,
    pub transfer_id: u32,
}

/// TTL-based cache of final responses with FIFO eviction
#[derive(Debug)]
pub struct CompletionCache {
    entries: HashMap<CacheKey, CacheEntry>,
    insertion_order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl CompletionCache {
    /// Create a cache with custom settings
    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Remember the final response of a transfer.
    #[instrument(skip(self, response), fields(op = response.operation.name()))]
    pub fn record(&mut self, peer: SocketAddr, transfer_id: u32, response: Packet) {
        self.cleanup_expired();

        let key = CacheKey { peer, transfer_id };
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let to_remove = self.entries.len() - self.max_entries + 1;
            self.remove_oldest_entries(to_remove);
        }

        let entry = CacheEntry {
            added_at: Instant::now(),
            response,
        };
        if self.entries.insert(key, entry).is_none() {
            self.insertion_order.push_back(key);
        }
        debug!(%peer, transfer_id, "Final response cached");
    }

    /// Final response of a finished transfer, if still cached.
    pub fn lookup(&mut self, peer: SocketAddr, transfer_id: u32) -> Option<Packet> {
        self.cleanup_expired();
        self.entries
            .get(&CacheKey { peer, transfer_id })
            .map(|entry| entry.response.clone())
    }

    /// Remove expired entries from the cache
    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let initial_count = self.entries.len();

        self.entries
            .retain(|_, entry| now.duration_since(entry.added_at) < self.ttl);

        // Clean up insertion_order queue to match HashMap
        while let Some(key) = self.insertion_order.front() {
            if !self.entries.contains_key(key) {
                self.insertion_order.pop_front();
            } else {
                break;
            }
        }

        let removed = initial_count - self.entries.len();
        if removed > 0 {
            debug!("Cleaned up {} expired completion cache entries", removed);
        }
    }

    #[inline]
    fn remove_oldest_entries(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::OpCode;
    use std::thread;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_record_and_lookup() {
        let mut cache = CompletionCache::with_settings(Duration::from_secs(60), 100);
        let ack = Packet::new(OpCode::Ack, 7, 3);
        cache.record(peer(1000), 7, ack.clone());

        assert_eq!(cache.lookup(peer(1000), 7), Some(ack));
        assert_eq!(cache.lookup(peer(1000), 8), None);
        assert_eq!(cache.lookup(peer(1001), 7), None);
    }

    #[test]
    fn test_expiration() {
        let mut cache = CompletionCache::with_settings(Duration::from_millis(10), 100);
        cache.record(peer(1000), 1, Packet::new(OpCode::Ack, 1, 0));

        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.lookup(peer(1000), 1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_max_entries_limit() {
        let mut cache = CompletionCache::with_settings(Duration::from_secs(60), 5);
        for id in 0..10u32 {
            cache.record(peer(2000), id, Packet::new(OpCode::Ack, id, 0));
        }

        assert_eq!(cache.len(), 5);
        assert_eq!(cache.lookup(peer(2000), 0), None);
        assert!(cache.lookup(peer(2000), 9).is_some());
    }

    #[test]
    fn test_rerecord_replaces_response() {
        let mut cache = CompletionCache::with_settings(Duration::from_secs(60), 5);
        cache.record(peer(3000), 1, Packet::new(OpCode::Ack, 1, 1));
        cache.record(peer(3000), 1, Packet::new(OpCode::Ack, 1, 2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(peer(3000), 1).map(|p| p.sequence), Some(2));
    }
}
