use crate::engine::{Engine, EngineConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Large buffer: everything stays in the active memtable.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        write_buffer_size: 64 * 1024,
        ..EngineConfig::default()
    }
}

/// Small buffer: memtables freeze every couple of dozen writes.
pub fn small_buffer_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        write_buffer_size: 1024,
        ..EngineConfig::default()
    }
}

/// Small buffer and compaction after only two runs per level.
pub fn eager_compaction_config() -> EngineConfig {
    EngineConfig {
        min_threshold: 2,
        max_threshold: 8,
        ..small_buffer_config()
    }
}

pub fn open(path: &Path, config: EngineConfig) -> Engine {
    Engine::open(path, config).expect("open")
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key_{i:05}").into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value_{i:05}").into_bytes()
}

/// Writes `key(i) -> value(i)` for every `i` in `range`, flushing each
/// frozen memtable right away.
pub fn put_range(engine: &Engine, range: std::ops::Range<usize>) {
    for i in range {
        if engine.put(key(i), value(i)).expect("put") {
            engine.flush_all_frozen().expect("flush");
        }
    }
}

/// Collects a scan, panicking on read errors.
pub fn scan_all(engine: &Engine, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
    engine
        .scan(start, end)
        .expect("scan")
        .collect::<Result<Vec<_>, _>>()
        .expect("scan item")
}

pub fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}
