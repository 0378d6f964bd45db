use crate::engine::utils::Record;
use crate::sstable::{SSTable, SstWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn put(key: &[u8], value: &[u8], lsn: u64) -> Record {
    Record::put(key, value, lsn)
}

pub fn del(key: &[u8], lsn: u64) -> Record {
    Record::delete(key, lsn)
}

/// `key_00000 .. key_{n-1}` with values `value_i`, LSN `i + 1`.
pub fn sequential_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::put(
                format!("key_{i:05}").into_bytes(),
                format!("value_{i}").into_bytes(),
                i as u64 + 1,
            )
        })
        .collect()
}

pub fn build(dir: &Path, name: &str, records: Vec<Record>) -> PathBuf {
    let path = dir.join(name);
    let count = records.len();
    SstWriter::new(&path).build(records.into_iter(), count).unwrap();
    path
}

pub fn build_and_open(dir: &Path, records: Vec<Record>) -> SSTable {
    SSTable::open(build(dir, "000001.sst", records)).unwrap()
}

pub fn record_keys(records: impl Iterator<Item = Record>) -> Vec<Vec<u8>> {
    records.map(|r| r.key().to_vec()).collect()
}
