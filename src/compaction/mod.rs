//! # Compaction Module
//!
//! Merges sorted runs so reads touch fewer files and dead versions are
//! reclaimed. Two strategies share one execution path:
//!
//! ## Minor Compaction (Tiered)
//!
//! Picks the lowest level holding at least `min_threshold` runs and merges
//! its oldest runs (at most `max_threshold`) into one run one level down.
//! Runs elsewhere in the tree may still hold older versions, so tombstones
//! survive unless the *tombstone horizon* proves them unnecessary.
//!
//! ## Major Compaction (Full Merge)
//!
//! User-triggered. Merges every run into one. Nothing older exists outside
//! the merge, so every tombstone is dropped.
//!
//! ## Tombstone horizon
//!
//! A tombstone with LSN `t` only matters if some run *outside* the merge
//! holds a version of its key older than `t`. Every run carries its
//! smallest LSN, so the horizon is the minimum `min_lsn` over the runs not
//! being merged (`u64::MAX` when the merge covers all runs). A tombstone is
//! dropped iff `t < horizon`. Memtables never matter here: everything they
//! hold is newer than every run.
//!
//! ## Installation
//!
//! [`execute`] builds the output under a fresh id, opens it, and only then
//! commits a single manifest event that adds the output and removes the
//! inputs. Any failure before the commit deletes the output, leaving the
//! previous run set untouched; the job can simply be retried. Input files
//! are not deleted here: the engine marks them obsolete once its in-memory
//! view no longer references them, and the last reader to drop a run
//! removes the file.

pub mod tiered;

use std::path::Path;
use std::sync::Arc;

use crate::engine::EngineConfig;
use crate::engine::utils::{MergeIterator, Record, ScanErrorSlot, checked_source};
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::sstable::{SSTable, SSTableError, ScanIterator, SstWriter, sstable_file_name};
use tracing::{debug, info, warn};

// ------------------------------------------------------------------------------------------------
// CompactionStrategy trait
// ------------------------------------------------------------------------------------------------

/// Chooses what to compact.
///
/// Strategies only select; [`execute`] does the I/O. Returning `None`
/// means there is nothing worth doing right now.
pub trait CompactionStrategy: Send + Sync {
    fn pick(&self, runs: &[Arc<SSTable>], config: &EngineConfig) -> Option<CompactionTask>;
}

// ------------------------------------------------------------------------------------------------
// CompactionStrategyType: config-level strategy selector
// ------------------------------------------------------------------------------------------------

/// Selects the strategy family the engine uses.
///
/// # Example
///
/// ```rust
/// use keylite::{CompactionStrategyType, DbConfig};
///
/// let config = DbConfig {
///     compaction_strategy: CompactionStrategyType::Tiered,
///     ..DbConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategyType {
    /// Level-tiered: runs move down one level each time they are merged.
    #[default]
    Tiered,
}

impl CompactionStrategyType {
    pub fn minor(&self) -> Box<dyn CompactionStrategy> {
        match self {
            Self::Tiered => Box::new(tiered::MinorCompaction),
        }
    }

    pub fn major(&self) -> Box<dyn CompactionStrategy> {
        match self {
            Self::Tiered => Box::new(tiered::MajorCompaction),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// A selected compaction job.
pub struct CompactionTask {
    /// Runs to merge. They stay alive (and their files on disk) for as long
    /// as the task holds them.
    pub inputs: Vec<Arc<SSTable>>,

    /// Level assigned to the output run.
    pub output_level: u32,

    /// Tombstones with an LSN below this are dropped.
    pub horizon: u64,

    /// Label used in log fields.
    pub kind: &'static str,
}

impl CompactionTask {
    pub fn input_ids(&self) -> Vec<u64> {
        self.inputs.iter().map(|s| s.id).collect()
    }
}

/// Result of a committed compaction.
pub struct CompactionOutcome {
    /// Ids of the input runs, now removed from the manifest.
    pub removed_ids: Vec<u64>,

    /// The output run, `None` when nothing survived the merge.
    pub output: Option<Arc<SSTable>>,
}

/// Minimum `min_lsn` over `runs` that are not among `inputs`.
pub fn tombstone_horizon(runs: &[Arc<SSTable>], inputs: &[Arc<SSTable>]) -> u64 {
    runs.iter()
        .filter(|run| !inputs.iter().any(|input| input.id == run.id))
        .map(|run| run.min_lsn())
        .min()
        .unwrap_or(u64::MAX)
}

// ------------------------------------------------------------------------------------------------
// Merge stream
// ------------------------------------------------------------------------------------------------

/// Keeps the newest version of every key and drops tombstones below the
/// horizon.
///
/// Input must be ordered `(key ASC, LSN DESC)`, as produced by
/// [`MergeIterator`].
pub struct CompactionStream<I: Iterator<Item = Record>> {
    input: I,
    horizon: u64,
    last_key: Option<Vec<u8>>,
    dropped_tombstones: u64,
}

impl<I: Iterator<Item = Record>> CompactionStream<I> {
    pub fn new(input: I, horizon: u64) -> Self {
        Self {
            input,
            horizon,
            last_key: None,
            dropped_tombstones: 0,
        }
    }
}

impl<I: Iterator<Item = Record>> Iterator for CompactionStream<I> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.input.next()?;
            if self.last_key.as_deref() == Some(record.key()) {
                continue;
            }
            self.last_key = Some(record.key().to_vec());

            if record.is_delete() && record.lsn() < self.horizon {
                self.dropped_tombstones += 1;
                continue;
            }
            return Some(record);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared error type
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Execution: merge, build, install
// ------------------------------------------------------------------------------------------------

/// Runs `task`: merges its inputs into at most one new run in `sst_dir`
/// and commits the swap to `manifest`.
///
/// On error nothing is committed and no output file remains.
pub fn execute(
    task: &CompactionTask,
    manifest: &Manifest,
    sst_dir: &Path,
    block_cache_capacity: usize,
) -> Result<CompactionOutcome, CompactionError> {
    let removed_ids = task.input_ids();
    if removed_ids.is_empty() {
        return Err(CompactionError::Internal("compaction task without inputs".into()));
    }

    info!(
        kind = task.kind,
        inputs = ?removed_ids,
        output_level = task.output_level,
        horizon = task.horizon,
        "compaction started"
    );

    let errors = ScanErrorSlot::default();
    let mut sources = Vec::with_capacity(task.inputs.len());
    for run in &task.inputs {
        let scan = ScanIterator::new(Arc::clone(run), None, None)?;
        sources.push(checked_source(scan, &errors));
    }
    let expected: u64 = task.inputs.iter().map(|s| s.properties.record_count).sum();

    let mut stream = CompactionStream::new(MergeIterator::new(sources), task.horizon);

    let output = if let Some(first) = stream.next() {
        let id = manifest.allocate_sst_id()?;
        let path = sst_dir.join(sstable_file_name(id));
        let build = SstWriter::new(&path).build(std::iter::once(first).chain(&mut stream), expected as usize);

        let opened = build.map_err(CompactionError::from).and_then(|_| {
            if let Some(e) = errors.take() {
                return Err(CompactionError::SSTable(e));
            }
            let mut sst = SSTable::open_with_cache(&path, block_cache_capacity)?;
            sst.id = id;
            sst.level = task.output_level;
            Ok(Arc::new(sst))
        });

        match opened {
            Ok(sst) => {
                debug!(id, dropped_tombstones = stream.dropped_tombstones, "compaction output built");
                Some(sst)
            }
            Err(e) => {
                remove_partial_output(&path);
                return Err(e);
            }
        }
    } else {
        if let Some(e) = errors.take() {
            return Err(CompactionError::SSTable(e));
        }
        None
    };

    let added = output
        .iter()
        .map(|sst| ManifestSstEntry {
            id: sst.id,
            level: sst.level,
        })
        .collect();
    if let Err(e) = manifest.apply_compaction(added, removed_ids.clone()) {
        if let Some(sst) = &output {
            sst.mark_obsolete();
        }
        return Err(e.into());
    }
    if let Err(e) = manifest.checkpoint() {
        warn!(error = %e, "manifest checkpoint after compaction failed, event log still holds the swap");
    }

    info!(
        kind = task.kind,
        removed = removed_ids.len(),
        output = ?output.as_ref().map(|s| s.id),
        "compaction committed"
    );

    Ok(CompactionOutcome {
        removed_ids,
        output,
    })
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial compaction output"),
    }
}
