use crate::manifest::{Manifest, ManifestSstEntry};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn open_manifest(temp: &TempDir) -> Manifest {
    Manifest::open(temp.path()).expect("Manifest open failed")
}

pub fn run(id: u64, level: u32) -> ManifestSstEntry {
    ManifestSstEntry { id, level }
}
