//! Minor compaction: merge the oldest runs of the lowest level that has
//! reached `min_threshold` runs.

use std::sync::Arc;

use super::group_by_level;
use crate::compaction::{CompactionTask, tombstone_horizon};
use crate::engine::EngineConfig;
use crate::sstable::SSTable;
use tracing::debug;

pub fn pick(runs: &[Arc<SSTable>], config: &EngineConfig) -> Option<CompactionTask> {
    let levels = group_by_level(runs);

    let Some((&level, group)) = levels
        .iter()
        .find(|(_, group)| group.len() >= config.min_threshold)
    else {
        debug!(runs = runs.len(), "minor compaction: no level over threshold");
        return None;
    };

    let inputs: Vec<Arc<SSTable>> = group.iter().take(config.max_threshold).cloned().collect();
    let horizon = tombstone_horizon(runs, &inputs);

    debug!(level, selected = inputs.len(), horizon, "minor compaction: level selected");

    Some(CompactionTask {
        inputs,
        output_level: level + 1,
        horizon,
        kind: "minor",
    })
}
