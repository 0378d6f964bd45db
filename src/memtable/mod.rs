//! # Memtable Module
//!
//! The mutable, in-memory layer of the engine: a sorted map holding the
//! newest version of every recently written key, backed by its own log
//! segment for durability.
//!
//! ## Write path
//!
//! Every `put` / `delete` is appended to the log segment (and fsynced)
//! before it touches the map. The map lock is taken only for the in-memory
//! insert, so lookups never wait on disk I/O.
//!
//! ## Versioning
//!
//! Each key holds exactly one [`MemtableEntry`]. An incoming write replaces
//! the stored entry when its LSN is not older; replaying a segment in any
//! order therefore converges on the newest version.
//!
//! ## Lifecycle
//!
//! A memtable is *active* while it accepts writes. Once it reports
//! [`Memtable::is_full`] the engine stops writing to it (it becomes
//! *frozen*), flushes [`Memtable::records`] into a sorted run and deletes the
//! segment.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    ops::Bound,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;
use tracing::{error, info, trace};

use crate::engine::utils::{HexKey, Record};
use crate::wal::{Wal, WalError};

/// Per-entry bookkeeping charged on top of key and value bytes.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<MemtableEntry>() + std::mem::size_of::<usize>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("WAL error: {0}")]
    WAL(#[from] WalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// Newest version of a key. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemtableEntry {
    pub value: Option<Vec<u8>>,
    pub lsn: u64,
}

/// Outcome of [`Memtable::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemtableGetResult {
    Put { value: Vec<u8>, lsn: u64 },
    Delete { lsn: u64 },
    NotFound,
}

struct MemtableInner {
    tree: BTreeMap<Vec<u8>, MemtableEntry>,
    approximate_size: usize,
    max_lsn: u64,
}

impl MemtableInner {
    fn entry_size(key: &[u8], value: Option<&[u8]>) -> usize {
        key.len() + value.map_or(0, <[u8]>::len) + ENTRY_OVERHEAD
    }

    /// Applies a record; older versions than the stored one are ignored.
    fn apply(&mut self, record: Record) {
        let lsn = record.lsn();
        self.max_lsn = self.max_lsn.max(lsn);

        let (key, value) = match record {
            Record::Put { key, value, .. } => (key, Some(value)),
            Record::Delete { key, .. } => (key, None),
        };

        let new_size = Self::entry_size(&key, value.as_deref());
        match self.tree.get_mut(&key) {
            Some(existing) if existing.lsn > lsn => {}
            Some(existing) => {
                let old_size = Self::entry_size(&key, existing.value.as_deref());
                self.approximate_size = self.approximate_size - old_size + new_size;
                *existing = MemtableEntry { value, lsn };
            }
            None => {
                self.approximate_size += new_size;
                self.tree.insert(key, MemtableEntry { value, lsn });
            }
        }
    }
}

fn entry_to_record(key: &[u8], entry: &MemtableEntry) -> Record {
    match &entry.value {
        Some(value) => Record::Put {
            key: key.to_vec(),
            value: value.clone(),
            lsn: entry.lsn,
        },
        None => Record::Delete {
            key: key.to_vec(),
            lsn: entry.lsn,
        },
    }
}

/// In-memory sorted buffer backed by a log segment.
pub struct Memtable {
    inner: RwLock<MemtableInner>,
    wal: Wal<Record>,
    write_buffer_size: usize,
}

impl Memtable {
    /// Opens (or creates) the segment at `wal_path` and replays it.
    ///
    /// A torn tail left by a crash is discarded, see [`Wal::recover`].
    pub fn open<P: AsRef<Path>>(
        wal_path: P,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
    ) -> Result<Self, MemtableError> {
        let wal = Wal::open(wal_path, max_record_size)?;

        let mut inner = MemtableInner {
            tree: BTreeMap::new(),
            approximate_size: 0,
            max_lsn: 0,
        };

        let records = wal.recover()?;
        let replayed = records.len();
        for record in records {
            inner.apply(record);
        }

        info!(
            wal = %wal.path().display(),
            replayed,
            keys = inner.tree.len(),
            max_lsn = inner.max_lsn,
            "memtable opened"
        );

        Ok(Self {
            inner: RwLock::new(inner),
            wal,
            write_buffer_size,
        })
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, MemtableInner>, MemtableError> {
        self.inner.read().map_err(|_| {
            error!("memtable lock poisoned");
            MemtableError::Internal("RwLock poisoned".into())
        })
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, MemtableInner>, MemtableError> {
        self.inner.write().map_err(|_| {
            error!("memtable lock poisoned");
            MemtableError::Internal("RwLock poisoned".into())
        })
    }

    /// Logs `record` durably, then applies it to the map.
    pub fn apply(&self, record: Record) -> Result<(), MemtableError> {
        self.wal.append(&record)?;
        trace!(
            key = %HexKey(record.key()),
            lsn = record.lsn(),
            delete = record.is_delete(),
            "memtable apply"
        );
        self.write_inner()?.apply(record);
        Ok(())
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, lsn: u64) -> Result<(), MemtableError> {
        self.apply(Record::Put { key, value, lsn })
    }

    pub fn delete(&self, key: Vec<u8>, lsn: u64) -> Result<(), MemtableError> {
        self.apply(Record::Delete { key, lsn })
    }

    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        let guard = self.read_inner()?;
        Ok(match guard.tree.get(key) {
            Some(MemtableEntry {
                value: Some(value),
                lsn,
            }) => MemtableGetResult::Put {
                value: value.clone(),
                lsn: *lsn,
            },
            Some(MemtableEntry { value: None, lsn }) => MemtableGetResult::Delete { lsn: *lsn },
            None => MemtableGetResult::NotFound,
        })
    }

    /// Copies every record in `[start, end)`, tombstones included.
    ///
    /// `None` leaves that side unbounded. An empty or inverted range
    /// returns nothing.
    pub fn range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Vec<Record>, MemtableError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Ok(Vec::new());
            }
        }

        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Excluded);

        let guard = self.read_inner()?;
        Ok(guard
            .tree
            .range::<[u8], _>((lower, upper))
            .map(|(k, e)| entry_to_record(k, e))
            .collect())
    }

    /// All records in key order, used when flushing to a sorted run.
    pub fn records(&self) -> Result<Vec<Record>, MemtableError> {
        self.range(None, None)
    }

    pub fn approximate_size(&self) -> Result<usize, MemtableError> {
        Ok(self.read_inner()?.approximate_size)
    }

    /// `true` once the buffered data reaches the configured write buffer size.
    pub fn is_full(&self) -> Result<bool, MemtableError> {
        Ok(self.read_inner()?.approximate_size >= self.write_buffer_size)
    }

    pub fn is_empty(&self) -> Result<bool, MemtableError> {
        Ok(self.read_inner()?.tree.is_empty())
    }

    pub fn len(&self) -> Result<usize, MemtableError> {
        Ok(self.read_inner()?.tree.len())
    }

    /// Highest LSN applied so far, `0` when empty.
    pub fn max_lsn(&self) -> Result<u64, MemtableError> {
        Ok(self.read_inner()?.max_lsn)
    }

    pub fn wal_seq(&self) -> u64 {
        self.wal.seq()
    }

    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }
}
