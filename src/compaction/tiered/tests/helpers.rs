use std::path::Path;
use std::sync::Arc;

use crate::engine::EngineConfig;
use crate::engine::utils::Record;
use crate::manifest::{Manifest, ManifestSstEntry};
use crate::sstable::{SSTable, SstWriter, sstable_file_name};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(min_threshold: usize, max_threshold: usize) -> EngineConfig {
    EngineConfig {
        min_threshold,
        max_threshold,
        ..EngineConfig::default()
    }
}

/// Writes `records` as run `id` at `level`, registers it in `manifest`.
pub fn make_run(dir: &Path, manifest: &Manifest, id: u64, level: u32, records: Vec<Record>) -> Arc<SSTable> {
    let path = dir.join(sstable_file_name(id));
    let count = records.len();
    SstWriter::new(&path).build(records.into_iter(), count).unwrap();
    manifest
        .apply_compaction(vec![ManifestSstEntry { id, level }], vec![])
        .unwrap();

    let mut sst = SSTable::open(&path).unwrap();
    sst.id = id;
    sst.level = level;
    Arc::new(sst)
}

/// One-record run for selection tests: key `k{id}`, LSN `lsn`.
pub fn tiny_run(dir: &Path, manifest: &Manifest, id: u64, level: u32, lsn: u64) -> Arc<SSTable> {
    make_run(
        dir,
        manifest,
        id,
        level,
        vec![Record::put(format!("k{id}"), "v", lsn)],
    )
}

pub fn ids(runs: &[Arc<SSTable>]) -> Vec<u64> {
    runs.iter().map(|s| s.id).collect()
}

pub fn collect(sst: &SSTable) -> Vec<(Vec<u8>, Option<Vec<u8>>, u64)> {
    sst.scan(None, None)
        .unwrap()
        .map(|r| (r.key().to_vec(), r.value().map(<[u8]>::to_vec), r.lsn()))
        .collect()
}
