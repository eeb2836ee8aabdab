//! Bounded LRU cache of parsed MFT records
//!
//! Shared by every handle opened on one volume. The volume is read-only for
//! the session, so entries never go stale; they are only evicted for space.

use crate::ntfs::mft::MftRecord;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct CacheEntry {
    record: Arc<MftRecord>,
    last_used: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<u64, CacheEntry>,
    /// last_used tick -> record number, oldest first
    order: BTreeMap<u64, u64>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl LruState {
    fn touch(&mut self, record_number: u64) -> Option<Arc<MftRecord>> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(&record_number)?;
        self.order.remove(&entry.last_used);
        entry.last_used = tick;
        self.order.insert(tick, record_number);
        Some(entry.record.clone())
    }

    fn remove(&mut self, record_number: u64) {
        if let Some(entry) = self.entries.remove(&record_number) {
            self.order.remove(&entry.last_used);
        }
    }
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

/// Parsed records keyed by record number, least-recently-used eviction
pub struct RecordCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl RecordCache {
    /// A capacity of 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn get(&self, record_number: u64) -> Option<Arc<MftRecord>> {
        if self.capacity == 0 {
            return None;
        }
        let mut state = self.state.lock();
        match state.touch(record_number) {
            // An entry filed under the wrong key is never served
            Some(record) if record.record_number() == record_number => {
                state.hits += 1;
                Some(record)
            }
            Some(_) => {
                state.remove(record_number);
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, record: Arc<MftRecord>) {
        if self.capacity == 0 {
            return;
        }
        let record_number = record.record_number();
        let mut state = self.state.lock();
        state.remove(record_number);

        while state.entries.len() >= self.capacity {
            let Some((_, oldest)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            debug!(target: "ntfs::cache", "evicted MFT record {}", oldest);
        }

        state.tick += 1;
        let tick = state.tick;
        state.order.insert(tick, record_number);
        state.entries.insert(
            record_number,
            CacheEntry {
                record,
                last_used: tick,
            },
        );
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            len: state.entries.len(),
        }
    }
}
