//! Per-step memoization of remote public-attribute fetches.
//!
//! Behaviors read attributes in unpredictable orders and often
//! repeatedly; memoizing by `(agent, attribute)` bounds the one-sided
//! traffic to one fetch per key per step. Insertion is safe from every
//! handler thread; the entry lock guarantees that two threads racing on
//! the same key still issue a single fetch.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use lockstep_fabric::FabricError;
use lockstep_types::{AttrId, GlobalId};

/// Thread-safe per-step cache of fetched attribute bytes.
#[derive(Debug, Default)]
pub struct ReadCache {
    entries: DashMap<(GlobalId, AttrId), Vec<u8>>,
    hits: AtomicU64,
    fetches: AtomicU64,
}

impl ReadCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries at the start of a step. Shard capacity is kept,
    /// so steady-state steps allocate nothing for the table itself.
    pub fn begin_step(&self) {
        self.entries.clear();
    }

    /// Return the cached bytes for `key`, fetching them once if absent.
    ///
    /// Concurrent callers with the same key serialize on the entry: the
    /// first runs `fetch`, the rest observe the inserted bytes.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error; nothing is inserted in that case.
    pub fn get_or_fetch(
        &self,
        key: (GlobalId, AttrId),
        fetch: impl FnOnce() -> Result<Vec<u8>, FabricError>,
    ) -> Result<Vec<u8>, FabricError> {
        if let Some(bytes) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes.clone());
        }
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                let bytes = fetch()?;
                entry.insert(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Cumulative cache hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cumulative fetches (cache misses that went to the fabric).
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
