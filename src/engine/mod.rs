//! # LSM Storage Engine
//!
//! A synchronous, crash-safe LSM-tree engine: durable log segments, an
//! in-memory write buffer, immutable sorted runs on disk and background-
//! friendly flush and compaction entry points.
//!
//! ## Design Overview
//!
//! Data lives in three layers, queried newest-first:
//!
//! 1. **Active memtable**: sorted map backed by its own log segment.
//! 2. **Frozen memtables**: former active memtables waiting for flush.
//! 3. **Sorted runs**: immutable files with a sparse index and a bloom
//!    filter, grouped into levels by the manifest.
//!
//! Every write gets the next LSN, is appended to the active segment
//! (fsynced) and then applied to the memtable. Once the memtable reaches
//! [`EngineConfig::write_buffer_size`] it is frozen and a fresh memtable on
//! a new segment takes over. [`Engine::flush_oldest_frozen`] turns the
//! oldest frozen memtable into a level-0 run and deletes its segment.
//!
//! ## Concurrency Model
//!
//! The set of layers is an immutable [`Version`] behind
//! `RwLock<Arc<Version>>`. Readers clone the `Arc` and work on that
//! snapshot without holding any lock; writers of the layer set build a new
//! `Version` and swap it in.
//!
//! - Puts and deletes are serialized by the writer mutex, which also owns
//!   the LSN counter. Freezing the active memtable happens under it.
//! - At most one flush and one compaction run at a time, each guarded by
//!   its own mutex. Their expensive I/O happens with no version lock held.
//! - Runs are reference counted. A run removed by compaction is marked
//!   obsolete and its file disappears when the last snapshot holding it
//!   (for instance a live range iterator) is dropped.
//!
//! ## Guarantees
//!
//! - **Durability:** a write is in its log segment before `put` returns.
//! - **Crash recovery:** [`Engine::open`] rebuilds the layer set from the
//!   manifest, replays every live segment and sweeps files a crash left
//!   behind.
//! - **Snapshot reads:** a [`RangeIter`] sees the state at creation time
//!   and nothing written afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::compaction::{self, CompactionError, CompactionStrategy, CompactionStrategyType};
use crate::encoding;
use crate::manifest::{self, Manifest, ManifestError, ManifestSstEntry};
use crate::memtable::{Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{self, DEFAULT_BLOCK_CACHE_CAPACITY, SSTable, SSTableError, ScanIterator, SstWriter};
use crate::wal::{parse_segment_seq, segment_file_name};

mod encoding_impls;
pub mod utils;
mod visibility;
pub use utils::{MergeIterator, Record};
use utils::{HexKey, ScanErrorSlot, checked_source};
pub use visibility::VisibilityFilter;

#[cfg(test)]
mod tests;

pub const MANIFEST_DIR: &str = "manifest";
pub const MEMTABLE_DIR: &str = "memtables";
pub const SSTABLE_DIR: &str = "sstables";

/// Record limit of memtable log segments: the decoder's byte-length bound.
const SEGMENT_MAX_RECORD_SIZE: u32 = encoding::MAX_BYTE_LEN;

/// Room for the record tag, both length prefixes and the LSN.
const RECORD_OVERHEAD: usize = 64;

/// Largest `key.len() + value.len()` one write can carry.
pub const MAX_ENTRY_SIZE: usize = SEGMENT_MAX_RECORD_SIZE as usize - RECORD_OVERHEAD;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max memtable size (bytes) before freeze.
    pub write_buffer_size: usize,

    /// Strategy family backing [`Engine::minor_compact`] and
    /// [`Engine::major_compact`].
    pub compaction_strategy: CompactionStrategyType,

    /// Runs a level needs before minor compaction merges it.
    pub min_threshold: usize,

    /// Max runs merged by one minor compaction.
    pub max_threshold: usize,

    /// Cached data blocks per run; `0` disables caching.
    pub block_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024,
            compaction_strategy: CompactionStrategyType::Tiered,
            min_threshold: 4,
            max_threshold: 32,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Frozen memtables pending flush.
    pub frozen_count: usize,
    /// Live sorted runs.
    pub sstables_count: usize,
    /// Run count per level.
    pub levels: BTreeMap<u32, usize>,
    /// Sum of all run file sizes in bytes.
    pub total_sst_size_bytes: u64,
    /// Per-run file sizes (newest first).
    pub sst_sizes: Vec<u64>,
    /// LSN the next write will get.
    pub next_lsn: u64,
}

// ------------------------------------------------------------------------------------------------
// Version: immutable view of the layer set
// ------------------------------------------------------------------------------------------------

/// One consistent set of layers.
pub(crate) struct Version {
    active: Arc<Memtable>,
    /// Newest first.
    frozen: Vec<Arc<Memtable>>,
    /// Ordered by `max_lsn` descending.
    sstables: Vec<Arc<SSTable>>,
}

impl Version {
    fn with_sstables(&self, mut sstables: Vec<Arc<SSTable>>) -> Self {
        sstables.sort_by_key(|s| std::cmp::Reverse(s.max_lsn()));
        Self {
            active: Arc::clone(&self.active),
            frozen: self.frozen.clone(),
            sstables,
        }
    }
}

struct WriterState {
    next_lsn: u64,
}

struct EngineInner {
    data_dir: PathBuf,
    config: EngineConfig,
    manifest: Manifest,
    state: RwLock<Arc<Version>>,
    writer: Mutex<WriterState>,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
}

/// The main LSM storage engine handle.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, EngineError> {
    mutex
        .lock()
        .map_err(|_| EngineError::Internal(format!("{what} mutex poisoned")))
}

/// `Ok(None)` when another thread holds the lock.
fn try_lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<Option<MutexGuard<'a, T>>, EngineError> {
    match mutex.try_lock() {
        Ok(guard) => Ok(Some(guard)),
        Err(TryLockError::WouldBlock) => Ok(None),
        Err(TryLockError::Poisoned(_)) => Err(EngineError::Internal(format!("{what} mutex poisoned"))),
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Version helpers
    // --------------------------------------------------------------------------------------------

    fn current(&self) -> Result<Arc<Version>, EngineError> {
        self.inner
            .state
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    /// Replaces the current version with `f(current)`.
    fn install(&self, f: impl FnOnce(&Version) -> Version) -> Result<(), EngineError> {
        let mut guard = self
            .inner
            .state
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        let next = f(&guard);
        *guard = Arc::new(next);
        Ok(())
    }

    fn sstable_dir(&self) -> PathBuf {
        self.inner.data_dir.join(SSTABLE_DIR)
    }

    fn memtable_dir(&self) -> PathBuf {
        self.inner.data_dir.join(MEMTABLE_DIR)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) an engine rooted at `path`.
    ///
    /// 1. Open the manifest (snapshot + event replay).
    /// 2. Sweep leftovers: `.tmp` files, runs the manifest does not list and
    ///    segments that are neither active nor frozen.
    /// 3. Open every listed run and replay the active and frozen segments.
    /// 4. Continue LSNs after the highest one found anywhere.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let base = path.as_ref();
        let manifest_dir = base.join(MANIFEST_DIR);
        let memtable_dir = base.join(MEMTABLE_DIR);
        let sstable_dir = base.join(SSTABLE_DIR);

        fs::create_dir_all(&manifest_dir)?;
        fs::create_dir_all(&memtable_dir)?;
        fs::create_dir_all(&sstable_dir)?;

        let manifest = Manifest::open(&manifest_dir)?;
        let entries = manifest.get_sstables()?;
        let active_seq = manifest.get_active_wal()?;
        let frozen_seqs = manifest.get_frozen_wals()?;

        sweep_sstable_dir(&sstable_dir, &entries)?;
        sweep_memtable_dir(&memtable_dir, active_seq, &frozen_seqs)?;

        let mut sstables = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut sst =
                SSTable::open_with_cache(sstable_dir.join(entry.file_name()), config.block_cache_capacity)?;
            sst.id = entry.id;
            sst.level = entry.level;
            sstables.push(Arc::new(sst));
        }
        sstables.sort_by_key(|s| std::cmp::Reverse(s.max_lsn()));

        let open_segment = |seq: u64| {
            Memtable::open(
                memtable_dir.join(segment_file_name(seq)),
                Some(SEGMENT_MAX_RECORD_SIZE),
                config.write_buffer_size,
            )
            .map(Arc::new)
        };
        let active = open_segment(active_seq)?;
        let mut frozen = frozen_seqs
            .iter()
            .map(|&seq| open_segment(seq))
            .collect::<Result<Vec<_>, _>>()?;
        frozen.reverse();

        let mut max_lsn = manifest.get_last_lsn()?.max(active.max_lsn()?);
        for memtable in &frozen {
            max_lsn = max_lsn.max(memtable.max_lsn()?);
        }
        for sst in &sstables {
            max_lsn = max_lsn.max(sst.max_lsn());
        }

        info!(
            path = %base.display(),
            runs = sstables.len(),
            frozen = frozen.len(),
            active_wal = active_seq,
            next_lsn = max_lsn + 1,
            "engine opened"
        );

        let version = Version {
            active,
            frozen,
            sstables,
        };
        Ok(Self {
            inner: Arc::new(EngineInner {
                data_dir: base.to_path_buf(),
                config,
                manifest,
                state: RwLock::new(Arc::new(version)),
                writer: Mutex::new(WriterState { next_lsn: max_lsn + 1 }),
                flush_lock: Mutex::new(()),
                compaction_lock: Mutex::new(()),
            }),
        })
    }

    /// Flushes everything buffered and checkpoints the manifest.
    ///
    /// After `close` every acknowledged write lives in a sorted run and the
    /// log segments hold nothing that still needs replay.
    pub fn close(&self) -> Result<(), EngineError> {
        let writer = lock(&self.inner.writer, "writer")?;
        self.freeze_if_not_empty(&writer)?;

        let _flush = lock(&self.inner.flush_lock, "flush")?;
        while self.flush_oldest_locked()? {}

        if writer.next_lsn > 1 {
            self.inner.manifest.update_lsn(writer.next_lsn - 1)?;
        }
        self.inner.manifest.checkpoint()?;

        for dir in [
            self.inner.data_dir.join(MANIFEST_DIR),
            self.memtable_dir(),
            self.sstable_dir(),
            self.inner.data_dir.clone(),
        ] {
            manifest::fsync_dir(&dir)?;
        }

        info!(path = %self.inner.data_dir.display(), "engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Applies one write under the writer lock.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen (the caller
    /// should arrange a flush).
    ///
    /// Once the record is logged the write is committed. A failed freeze
    /// after that is logged and retried by the next write.
    fn write(&self, make: impl FnOnce(u64) -> Record) -> Result<bool, EngineError> {
        let mut writer = lock(&self.inner.writer, "writer")?;
        let version = self.current()?;

        let lsn = writer.next_lsn;
        version.active.apply(make(lsn))?;
        writer.next_lsn += 1;

        match version.active.is_full() {
            Ok(true) => match self.freeze_active(&writer) {
                Ok(()) => Ok(true),
                Err(e) => {
                    warn!(lsn, error = %e, "memtable freeze failed, write kept in active memtable");
                    Ok(false)
                }
            },
            Ok(false) => Ok(false),
            Err(e) => {
                warn!(lsn, error = %e, "memtable size check failed");
                Ok(false)
            }
        }
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<bool, EngineError> {
        trace!(key = %HexKey(&key), value_len = value.len(), "engine put");
        self.write(|lsn| Record::Put { key, value, lsn })
    }

    /// Delete a key (insert a tombstone).
    pub fn delete(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        trace!(key = %HexKey(&key), "engine delete");
        self.write(|lsn| Record::Delete { key, lsn })
    }

    /// Swaps in a fresh active memtable on the next segment.
    ///
    /// Requires the writer lock; the guard is taken as proof.
    fn freeze_active(&self, _writer: &MutexGuard<'_, WriterState>) -> Result<(), EngineError> {
        let current = self.current()?;
        let frozen_seq = current.active.wal_seq();
        let active_seq = frozen_seq + 1;

        let memtable_dir = self.memtable_dir();
        let new_path = memtable_dir.join(segment_file_name(active_seq));
        let new_active = Arc::new(Memtable::open(
            &new_path,
            Some(SEGMENT_MAX_RECORD_SIZE),
            self.inner.config.write_buffer_size,
        )?);

        let committed = manifest::fsync_dir(&memtable_dir)
            .map_err(EngineError::from)
            .and_then(|()| Ok(self.inner.manifest.rotate_wal(frozen_seq, active_seq)?));
        if let Err(e) = committed {
            drop(new_active);
            remove_file_logged(&new_path);
            return Err(e);
        }

        self.install(|v| {
            let mut frozen = Vec::with_capacity(v.frozen.len() + 1);
            frozen.push(Arc::clone(&v.active));
            frozen.extend(v.frozen.iter().cloned());
            Version {
                active: new_active,
                frozen,
                sstables: v.sstables.clone(),
            }
        })?;

        debug!(frozen_wal = frozen_seq, active_wal = active_seq, "memtable frozen");
        Ok(())
    }

    fn freeze_if_not_empty(&self, writer: &MutexGuard<'_, WriterState>) -> Result<bool, EngineError> {
        if self.current()?.active.is_empty()? {
            return Ok(false);
        }
        self.freeze_active(writer)?;
        Ok(true)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Looks up a single key.
    ///
    /// Order: active memtable, frozen memtables (newest first), then runs.
    /// Memtables always hold newer data than runs, so the first memtable
    /// hit is final. Runs may overlap in LSN after compaction; they are
    /// ordered by `max_lsn` descending and the highest LSN found wins, with
    /// an early exit once no remaining run can beat it.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        trace!(key = %HexKey(key), "engine get");
        let version = self.current()?;

        for memtable in std::iter::once(&version.active).chain(version.frozen.iter()) {
            match memtable.get(key)? {
                MemtableGetResult::Put { value, .. } => return Ok(Some(value)),
                MemtableGetResult::Delete { .. } => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        let mut best: Option<sstable::GetResult> = None;
        let mut best_lsn = 0u64;
        for sst in &version.sstables {
            if sst.max_lsn() <= best_lsn {
                break;
            }
            match sst.get(key)? {
                sstable::GetResult::NotFound => {}
                result if result.lsn() > best_lsn => {
                    best_lsn = result.lsn();
                    best = Some(result);
                }
                _ => {}
            }
        }

        Ok(match best {
            Some(sstable::GetResult::Put { value, .. }) => Some(value),
            _ => None,
        })
    }

    /// Live key-value pairs in `[start, end)`, ascending.
    ///
    /// `None` leaves a side unbounded. The iterator works on a snapshot:
    /// memtable contents are copied now, runs are pinned until it is
    /// dropped, and later writes are never observed.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<RangeIter, EngineError> {
        trace!(
            start = ?start.map(HexKey),
            end = ?end.map(HexKey),
            "engine scan"
        );
        let version = self.current()?;
        let errors = ScanErrorSlot::default();
        let mut sources: Vec<utils::RecordSource<'static>> = Vec::new();

        for memtable in std::iter::once(&version.active).chain(version.frozen.iter()) {
            let records = memtable.range(start, end)?;
            if !records.is_empty() {
                sources.push(Box::new(records.into_iter()));
            }
        }

        for sst in &version.sstables {
            let scan = ScanIterator::new(
                Arc::clone(sst),
                start.map(<[u8]>::to_vec),
                end.map(<[u8]>::to_vec),
            )?;
            sources.push(checked_source(scan, &errors));
        }

        Ok(RangeIter {
            inner: VisibilityFilter::new(MergeIterator::new(sources)),
            errors,
            done: false,
        })
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let next_lsn = lock(&self.inner.writer, "writer")?.next_lsn;
        let version = self.current()?;

        let sst_sizes: Vec<u64> = version.sstables.iter().map(|s| s.file_size()).collect();
        let mut levels = BTreeMap::new();
        for sst in &version.sstables {
            *levels.entry(sst.level).or_insert(0) += 1;
        }

        Ok(EngineStats {
            frozen_count: version.frozen.len(),
            sstables_count: version.sstables.len(),
            levels,
            total_sst_size_bytes: sst_sizes.iter().sum(),
            sst_sizes,
            next_lsn,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Flush the oldest frozen memtable into a level-0 run.
    ///
    /// Returns `Ok(false)` if there was nothing to flush.
    pub fn flush_oldest_frozen(&self) -> Result<bool, EngineError> {
        let _flush = lock(&self.inner.flush_lock, "flush")?;
        self.flush_oldest_locked()
    }

    /// Like [`flush_oldest_frozen`](Self::flush_oldest_frozen) but returns
    /// `Ok(false)` immediately when another flush is running.
    pub fn try_flush_oldest_frozen(&self) -> Result<bool, EngineError> {
        match try_lock(&self.inner.flush_lock, "flush")? {
            Some(_flush) => self.flush_oldest_locked(),
            None => Ok(false),
        }
    }

    /// Flush **all** frozen memtables. Returns how many were flushed.
    pub fn flush_all_frozen(&self) -> Result<usize, EngineError> {
        let _flush = lock(&self.inner.flush_lock, "flush")?;
        let mut count = 0;
        while self.flush_oldest_locked()? {
            count += 1;
        }
        Ok(count)
    }

    /// Freezes the active memtable (if it holds anything) and flushes
    /// every frozen memtable.
    pub fn flush(&self) -> Result<usize, EngineError> {
        {
            let writer = lock(&self.inner.writer, "writer")?;
            self.freeze_if_not_empty(&writer)?;
        }
        self.flush_all_frozen()
    }

    /// Requires the flush lock.
    fn flush_oldest_locked(&self) -> Result<bool, EngineError> {
        let version = self.current()?;
        let Some(frozen) = version.frozen.last().cloned() else {
            return Ok(false);
        };
        drop(version);

        let wal_seq = frozen.wal_seq();
        let last_lsn = frozen.max_lsn()?;
        let records = frozen.records()?;

        let run = if records.is_empty() {
            None
        } else {
            Some(self.build_run(records)?)
        };

        let entry = run.as_ref().map(|sst| ManifestSstEntry {
            id: sst.id,
            level: sst.level,
        });
        if let Err(e) = self.inner.manifest.record_flush(entry, wal_seq, last_lsn) {
            if let Some(sst) = &run {
                sst.mark_obsolete();
            }
            return Err(e.into());
        }

        self.install(|v| {
            let mut sstables = v.sstables.clone();
            sstables.extend(run.iter().cloned());
            let mut next = v.with_sstables(sstables);
            next.frozen.retain(|m| !Arc::ptr_eq(m, &frozen));
            next
        })?;

        remove_file_logged(frozen.wal_path());
        info!(
            wal = wal_seq,
            run = ?run.as_ref().map(|s| s.id),
            last_lsn,
            "frozen memtable flushed"
        );
        Ok(true)
    }

    /// Writes `records` as a new level-0 run and opens it.
    fn build_run(&self, records: Vec<Record>) -> Result<Arc<SSTable>, EngineError> {
        let id = self.inner.manifest.allocate_sst_id()?;
        let path = self.sstable_dir().join(sstable::sstable_file_name(id));
        let count = records.len();

        SstWriter::new(&path).build(records.into_iter(), count)?;
        let mut sst = match SSTable::open_with_cache(&path, self.inner.config.block_cache_capacity) {
            Ok(sst) => sst,
            Err(e) => {
                remove_file_logged(&path);
                return Err(e.into());
            }
        };
        sst.id = id;
        sst.level = 0;
        Ok(Arc::new(sst))
    }

    // --------------------------------------------------------------------------------------------
    // Compaction API
    // --------------------------------------------------------------------------------------------

    /// Requires the compaction lock.
    fn run_compaction_locked(&self, strategy: &dyn CompactionStrategy) -> Result<bool, EngineError> {
        let version = self.current()?;
        let Some(task) = strategy.pick(&version.sstables, &self.inner.config) else {
            debug!(runs = version.sstables.len(), "compaction strategy found nothing to do");
            return Ok(false);
        };
        drop(version);

        let outcome = compaction::execute(
            &task,
            &self.inner.manifest,
            &self.sstable_dir(),
            self.inner.config.block_cache_capacity,
        )?;

        self.install(|v| {
            let mut sstables: Vec<Arc<SSTable>> = v
                .sstables
                .iter()
                .filter(|s| !outcome.removed_ids.contains(&s.id))
                .cloned()
                .collect();
            sstables.extend(outcome.output.iter().cloned());
            v.with_sstables(sstables)
        })?;

        for input in &task.inputs {
            input.mark_obsolete();
        }
        Ok(true)
    }

    fn compact_with(
        &self,
        selector: fn(&CompactionStrategyType) -> Box<dyn CompactionStrategy>,
    ) -> Result<bool, EngineError> {
        let _compaction = lock(&self.inner.compaction_lock, "compaction")?;
        let strategy = selector(&self.inner.config.compaction_strategy);
        self.run_compaction_locked(strategy.as_ref())
    }

    /// Runs one round of **minor compaction** on the lowest crowded level.
    ///
    /// Returns `Ok(false)` if no level reached `min_threshold`.
    pub fn minor_compact(&self) -> Result<bool, EngineError> {
        self.compact_with(CompactionStrategyType::minor)
    }

    /// Minor compaction that gives up immediately if another compaction is
    /// running.
    pub fn try_minor_compact(&self) -> Result<bool, EngineError> {
        match try_lock(&self.inner.compaction_lock, "compaction")? {
            Some(_compaction) => {
                let strategy = self.inner.config.compaction_strategy.minor();
                self.run_compaction_locked(strategy.as_ref())
            }
            None => Ok(false),
        }
    }

    /// Runs **major compaction**: merges all runs into one and drops every
    /// tombstone.
    ///
    /// Returns `Ok(false)` if the tree is empty or already a single clean
    /// run.
    pub fn major_compact(&self) -> Result<bool, EngineError> {
        self.compact_with(CompactionStrategyType::major)
    }
}

// ------------------------------------------------------------------------------------------------
// Range iterator
// ------------------------------------------------------------------------------------------------

/// Lazy, forward-only iterator returned by [`Engine::scan`].
///
/// Yields `Err` at most once (a run failed to read) and then ends.
pub struct RangeIter {
    inner: VisibilityFilter<MergeIterator<'static>>,
    errors: ScanErrorSlot,
    done: bool,
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next();
        if let Some(e) = self.errors.take() {
            self.done = true;
            return Some(Err(e.into()));
        }
        if item.is_none() {
            self.done = true;
        }
        item.map(Ok)
    }
}

// ------------------------------------------------------------------------------------------------
// Startup sweep
// ------------------------------------------------------------------------------------------------

fn sweep_sstable_dir(dir: &Path, live: &[ManifestSstEntry]) -> Result<(), EngineError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let stale = match path.extension().and_then(|e| e.to_str()) {
            Some("tmp") => true,
            Some("sst") => path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
                .is_some_and(|id| !live.iter().any(|e| e.id == id)),
            _ => false,
        };
        if stale {
            warn!(path = %path.display(), "removing leftover run file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn sweep_memtable_dir(dir: &Path, active: u64, frozen: &[u64]) -> Result<(), EngineError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(seq) = parse_segment_seq(&path) {
            if seq != active && !frozen.contains(&seq) {
                warn!(path = %path.display(), "removing unreferenced log segment");
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
