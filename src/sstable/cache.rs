//! Per-run cache of verified data blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;

/// Maps a block's position in the index to its verified bytes.
///
/// Backed by a concurrent `moka` cache, so lookups from many readers of the
/// same run never serialize on a lock. A capacity of `0` disables caching.
pub(crate) struct BlockCache {
    blocks: Option<Cache<usize, Arc<Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            blocks: (capacity > 0).then(|| Cache::new(capacity as u64)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, idx: usize) -> Option<Arc<Vec<u8>>> {
        let found = self.blocks.as_ref().and_then(|blocks| blocks.get(&idx));
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub(crate) fn insert(&self, idx: usize, data: Arc<Vec<u8>>) {
        if let Some(blocks) = &self.blocks {
            blocks.insert(idx, data);
        }
    }

    /// `(hits, misses)` since the run was opened.
    pub(crate) fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
