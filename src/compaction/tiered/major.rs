//! Major compaction: merge every run into one and drop all tombstones.
//!
//! The output goes to the deepest level among the inputs (never level 0).
//! A tree that is already a single tombstone-free run is left alone, so
//! repeating a major compaction is a no-op.

use std::sync::Arc;

use crate::compaction::CompactionTask;
use crate::engine::EngineConfig;
use crate::sstable::SSTable;
use tracing::debug;

pub fn pick(runs: &[Arc<SSTable>], _config: &EngineConfig) -> Option<CompactionTask> {
    match runs {
        [] => {
            debug!("major compaction: no runs");
            return None;
        }
        [only] if only.properties.tombstone_count == 0 => {
            debug!(id = only.id, "major compaction: single clean run, skipping");
            return None;
        }
        _ => {}
    }

    let output_level = runs.iter().map(|run| run.level).max().unwrap_or(0).max(1);

    Some(CompactionTask {
        inputs: runs.to_vec(),
        output_level,
        horizon: u64::MAX,
        kind: "major",
    })
}
