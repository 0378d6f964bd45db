use crate::memtable::Memtable;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Memtable on segment `000001.log` inside `dir`.
pub fn open_memtable(dir: &Path, write_buffer_size: usize) -> Memtable {
    Memtable::open(dir.join("000001.log"), None, write_buffer_size).unwrap()
}
