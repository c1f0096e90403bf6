use serde_json::Value;
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// A value waiting to reach the durable store.
///
/// `seq` orders requests for the same key: a write only settles the pending entry it was started for, so a newer
/// request that arrives while the older one is in flight stays visible to readers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingWrite {
    pub(crate) value: Value,
    pub(crate) seq:   u64,
}

#[derive(Debug)]
struct DebounceTimer {
    seq:    u64,
    handle: JoinHandle<()>,
}

/// Pending write buffer and its debounce timer table.
#[derive(Debug, Default)]
pub(crate) struct PendingBuffer {
    writes:  HashMap<String, PendingWrite>,
    timers:  HashMap<String, DebounceTimer>,
    // Highest sequence number that reached the durable store (or was found unchanged) per key.
    settled: HashMap<String, u64>,
}

impl PendingBuffer {
    pub(crate) fn get(&self, key: &str) -> Option<&PendingWrite> {
        self.writes.get(key)
    }

    pub(crate) fn stage(&mut self, key: &str, write: PendingWrite) {
        self.writes.insert(key.to_string(), write);
    }

    /// Get a copy of the pending write for `key` if it is still the one started as `seq`.
    pub(crate) fn get_seq(&self, key: &str, seq: u64) -> Option<PendingWrite> {
        self.writes.get(key).filter(|w| w.seq == seq).cloned()
    }

    /// True if a newer write for `key` has already settled.
    pub(crate) fn is_superseded(&self, key: &str, seq: u64) -> bool {
        self.settled.get(key).is_some_and(|&settled| settled > seq)
    }

    /// Mark write `seq` as done and drop the pending entry of `key` if it still belongs to it.
    pub(crate) fn settle(&mut self, key: &str, seq: u64) -> bool {
        let settled = self.settled.entry(key.to_string()).or_insert(seq);
        *settled = (*settled).max(seq);

        if self.writes.get(key).is_some_and(|w| w.seq == seq) {
            self.writes.remove(key);
            true
        }
        else {
            false
        }
    }

    pub(crate) fn cancel_timer(&mut self, key: &str) -> bool {
        if let Some(timer) = self.timers.remove(key) {
            timer.handle.abort();
            true
        }
        else {
            false
        }
    }

    pub(crate) fn set_timer(&mut self, key: &str, seq: u64, handle: JoinHandle<()>) {
        if let Some(old) = self.timers.insert(key.to_string(), DebounceTimer { seq, handle }) {
            old.handle.abort();
        }
    }

    /// Called by a timer task when it fires. The entry is forgotten without aborting, after this point the write
    /// can't be cancelled anymore.
    pub(crate) fn disarm_timer(&mut self, key: &str, seq: u64) -> bool {
        if self.timers.get(key).is_some_and(|t| t.seq == seq) {
            self.timers.remove(key);
            true
        }
        else {
            false
        }
    }

    pub(crate) fn has_timer(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    /// Abort every timer and hand over all pending writes.
    pub(crate) fn drain(&mut self) -> Vec<(String, PendingWrite)> {
        self.abort_timers();
        let mut writes = self.writes.iter().map(|(k, w)| (k.clone(), w.clone())).collect::<Vec<_>>();
        writes.sort_by_key(|(_, w)| w.seq);
        writes
    }

    pub(crate) fn len(&self) -> usize {
        self.writes.len()
    }

    fn abort_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}
