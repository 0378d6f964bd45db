//! Shared record type and the k-way merge used by scans and compaction.
//!
//! - [`Record`]: a versioned put or tombstone, the common currency of the
//!   memtable, sorted runs, compaction and range iteration.
//! - [`MergeIterator`]: a heap-based merge of several sorted record streams
//!   into one stream ordered by `(key ASC, LSN DESC)`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use crate::sstable::{SSTable, SSTableError, ScanIterator};

/// A single versioned mutation.
#[derive(Debug, Clone)]
pub enum Record {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lsn: u64,
    },

    /// Tombstone: hides every older version of `key`.
    Delete { key: Vec<u8>, lsn: u64 },
}

impl Record {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, lsn: u64) -> Self {
        Record::Put {
            key: key.into(),
            value: value.into(),
            lsn,
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>, lsn: u64) -> Self {
        Record::Delete {
            key: key.into(),
            lsn,
        }
    }

    pub fn lsn(&self) -> u64 {
        match self {
            Record::Put { lsn, .. } | Record::Delete { lsn, .. } => *lsn,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Record::Put { key, .. } | Record::Delete { key, .. } => key,
        }
    }

    /// `Some(value)` for a put, `None` for a tombstone.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Record::Put { value, .. } => Some(value),
            Record::Delete { .. } => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Record::Delete { .. })
    }
}

// ------------------------------------------------------------------------------------------------
// Ord / Eq: (key ASC, LSN DESC)
// ------------------------------------------------------------------------------------------------

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.lsn() == other.lsn()
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    /// For equal keys the newest version sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key()
            .cmp(other.key())
            .then_with(|| other.lsn().cmp(&self.lsn()))
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

/// Boxed record source accepted by [`MergeIterator`].
pub type RecordSource<'a> = Box<dyn Iterator<Item = Record> + Send + 'a>;

/// Merges sorted record streams into one `(key ASC, LSN DESC)` stream.
///
/// Every source must already be sorted in that order. Duplicates across
/// sources are all emitted; deduplication is up to the consumer.
pub struct MergeIterator<'a> {
    iters: Vec<RecordSource<'a>>,
    heap: BinaryHeap<HeapEntry>,
}

struct HeapEntry {
    record: Record,
    source_idx: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the smallest record.
        self.record
            .cmp(&other.record)
            .then_with(|| self.source_idx.cmp(&other.source_idx))
            .reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl<'a> MergeIterator<'a> {
    pub fn new(mut iters: Vec<RecordSource<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(iters.len());
        for (source_idx, iter) in iters.iter_mut().enumerate() {
            if let Some(record) = iter.next() {
                heap.push(HeapEntry { record, source_idx });
            }
        }
        Self { iters, heap }
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let HeapEntry { record, source_idx } = self.heap.pop()?;
        if let Some(next) = self.iters[source_idx].next() {
            self.heap.push(HeapEntry {
                record: next,
                source_idx,
            });
        }
        Some(record)
    }
}

// ------------------------------------------------------------------------------------------------
// Checked run sources
// ------------------------------------------------------------------------------------------------

/// First read error hit by any run source feeding one merge.
///
/// [`MergeIterator`] consumes infallible streams, so a failing run ends its
/// stream early and parks the error here. Consumers check the slot before
/// trusting the merged output.
#[derive(Clone, Default)]
pub struct ScanErrorSlot(Arc<Mutex<Option<SSTableError>>>);

impl ScanErrorSlot {
    fn record(&self, error: SSTableError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(error);
        }
    }

    pub fn take(&self) -> Option<SSTableError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

struct CheckedScan {
    inner: ScanIterator<Arc<SSTable>>,
    errors: ScanErrorSlot,
}

impl Iterator for CheckedScan {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next_record() {
            Ok(record) => record,
            Err(e) => {
                self.errors.record(e);
                None
            }
        }
    }
}

/// Wraps a run scan so read errors land in `errors` instead of being lost.
pub fn checked_source(scan: ScanIterator<Arc<SSTable>>, errors: &ScanErrorSlot) -> RecordSource<'static> {
    Box::new(CheckedScan {
        inner: scan,
        errors: errors.clone(),
    })
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when no such bound exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Compact hex rendering of a key for log fields.
pub(crate) struct HexKey<'a>(pub &'a [u8]);

impl std::fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = if self.0.len() <= 32 { self.0 } else { &self.0[..16] };
        for byte in shown {
            write!(f, "{byte:02x}")?;
        }
        if shown.len() < self.0.len() {
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
