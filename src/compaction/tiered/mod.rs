//! # Level-Tiered Compaction
//!
//! Runs are grouped by level. Fresh flushes land in level 0; every merge
//! writes its output one level below the inputs.
//!
//! - **Minor** ([`minor`]) merges the oldest runs of the lowest crowded
//!   level.
//! - **Major** ([`major`]) merges everything.

#[cfg(test)]
mod tests;

pub mod major;
pub mod minor;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::compaction::{CompactionStrategy, CompactionTask};
use crate::engine::EngineConfig;
use crate::sstable::SSTable;

/// Groups runs by level; each group is ordered oldest first (by `max_lsn`).
pub fn group_by_level(runs: &[Arc<SSTable>]) -> BTreeMap<u32, Vec<Arc<SSTable>>> {
    let mut levels: BTreeMap<u32, Vec<Arc<SSTable>>> = BTreeMap::new();
    for run in runs {
        levels.entry(run.level).or_default().push(Arc::clone(run));
    }
    for group in levels.values_mut() {
        group.sort_by_key(|run| run.max_lsn());
    }
    levels
}

/// Tiered minor compaction.
pub struct MinorCompaction;

impl CompactionStrategy for MinorCompaction {
    fn pick(&self, runs: &[Arc<SSTable>], config: &EngineConfig) -> Option<CompactionTask> {
        minor::pick(runs, config)
    }
}

/// Tiered major compaction.
pub struct MajorCompaction;

impl CompactionStrategy for MajorCompaction {
    fn pick(&self, runs: &[Arc<SSTable>], config: &EngineConfig) -> Option<CompactionTask> {
        major::pick(runs, config)
    }
}
