use crate::encoding::{Decode, Encode, EncodingError};
use crate::wal::{Wal, WalData, WalError};
use tracing_subscriber::EnvFilter;

/// Offset of the first record frame.
pub const WAL_DATA_START: u64 = crate::wal::WAL_DATA_OFFSET;

/// Small record type with an optional field, shaped like a memtable entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub lsn: u64,
}

impl TestRecord {
    pub fn put(i: u64) -> Self {
        Self {
            key: format!("key_{i:04}").into_bytes(),
            value: Some(format!("val_{i:04}").into_bytes()),
            lsn: i,
        }
    }
}

impl Encode for TestRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)?;
        self.lsn.encode_to(buf)
    }
}

impl Decode for TestRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key, mut off) = Vec::<u8>::decode_from(buf)?;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (lsn, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { key, value, lsn }, off))
    }
}

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn collect_iter<T: WalData>(wal: &Wal<T>) -> Result<Vec<T>, WalError> {
    wal.replay_iter()?.collect()
}

/// Writes `count` records to a new segment and returns the size of each
/// frame boundary: `offsets[i]` is the file length after `i` records.
pub fn write_records(path: &std::path::Path, count: u64) -> Vec<u64> {
    let wal: Wal<TestRecord> = Wal::open(path, None).unwrap();
    let mut offsets = vec![wal.file_size().unwrap()];
    for i in 0..count {
        wal.append(&TestRecord::put(i)).unwrap();
        offsets.push(wal.file_size().unwrap());
    }
    offsets
}

pub fn set_file_len(path: &std::path::Path, len: u64) {
    let f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    f.set_len(len).unwrap();
    f.sync_all().unwrap();
}
