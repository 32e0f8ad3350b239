//! Query log: duplicate suppression for floods and the reverse-path table
//! for responses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entries older than this are purged on every event-loop tick.
const ENTRY_TTL: Duration = Duration::from_secs(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogItem {
    pub upstream_peer: u32,
    pub source_id: u32,
    pub sequence: u32,
    pub insertion_time: Instant,
}

/// Time-bounded table keyed by `(sourceId, seq)`, started at construction
/// so eviction is measured against a monotonic clock (spec.md §9).
#[derive(Default)]
pub struct QueryLog {
    entries: HashMap<(u32, u32), LogItem>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a flood from `(source_id, sequence)` arrived via
    /// `upstream_peer`. Returns `true` the first time this pair is seen
    /// (ownership granted); `false` for any later arrival, including a
    /// query looping back to its own originator.
    pub fn log_query(&mut self, upstream_peer: u32, source_id: u32, sequence: u32) -> bool {
        let key = (source_id, sequence);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            LogItem {
                upstream_peer,
                source_id,
                sequence,
                insertion_time: Instant::now(),
            },
        );
        true
    }

    /// The upstream neighbor recorded for a response's `(sourceId, seq)`,
    /// or `None` if the entry has expired or never existed.
    pub fn upstream_for(&self, source_id: u32, sequence: u32) -> Option<u32> {
        self.entries
            .get(&(source_id, sequence))
            .map(|item| item.upstream_peer)
    }

    /// Removes entries older than [`ENTRY_TTL`]. Called on every tick.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, item| now.duration_since(item.insertion_time) <= ENTRY_TTL);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
