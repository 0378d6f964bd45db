//! Durability log.
//!
//! An append-only, checksummed record log. Every mutation is written here
//! and fsynced before the caller gets an acknowledgement; on restart the
//! log is replayed to rebuild state that never reached a sorted run.
//!
//! The log is generic over its record type, so the same code backs both
//! the memtable segments (`memtables/NNNNNN.log`) and the catalog event
//! log (`manifest/000000.log`).
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER 20 B][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header**: a [`WalHeader`] (magic, format version, record size
//!   limit, segment number) followed by its CRC32.
//! - **Record**: 4-byte little-endian length, the encoded record, and a
//!   CRC32 over `len || record_bytes`.
//!
//! # Concurrency model
//!
//! The file handle sits behind `Arc<Mutex<File>>`. Appends hold the lock for
//! the write, the fsync and any rollback, so concurrent appenders are
//! serialized.
//! [`WalIter`] keeps its own logical offset and seeks before every read, so
//! it can share the handle with appenders.
//!
//! # Recovery
//!
//! [`Wal::recover`] replays the longest valid prefix. The first torn or
//! corrupt record and everything after it are treated as never written:
//! the file is cut back to the end of the valid prefix so that later
//! appends stay replayable. Only genuine I/O failures are reported.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Encoded size of [`WalHeader`]: magic + version + max_record_size + wal_seq.
pub const WAL_HEADER_SIZE: usize = 4 + 4 + 4 + 8;

/// Offset of the first record (header plus its checksum).
pub const WAL_DATA_OFFSET: u64 = (WAL_HEADER_SIZE + U32_SIZE) as u64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// The file ended in the middle of a record frame.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata at the start of every log segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub max_record_size: u32,
    /// Segment number; must match the numeric file name.
    pub wal_seq: u64,
}

impl WalHeader {
    pub const MAGIC: [u8; 4] = *b"KWAL";
    pub const VERSION: u32 = 1;
    /// 1 MiB.
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

    pub fn new(max_record_size: u32, wal_seq: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            wal_seq,
        }
    }
}

impl Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.max_record_size.encode_to(buf)?;
        self.wal_seq.encode_to(buf)
    }
}

impl Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, mut off) = <[u8; 4]>::decode_from(buf)?;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (max_record_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (wal_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
                wal_seq,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Record types that can be stored in a [`Wal`].
pub trait WalData: Encode + Decode + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: Encode + Decode + std::fmt::Debug + Send + Sync {}

/// Formats the file name of log segment `seq`.
pub fn segment_file_name(seq: u64) -> String {
    format!("{seq:06}.log")
}

/// Parses the segment number out of a `NNNNNN.log` file name.
pub fn parse_segment_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_suffix(".log")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn header_bytes_with_crc(header: &WalHeader) -> Result<Vec<u8>, WalError> {
    let mut bytes = encoding::encode_to_vec(header)?;
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(bytes)
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A durable, typed, append-only record log.
#[derive(Debug)]
pub struct Wal<T: WalData> {
    inner_file: Arc<Mutex<File>>,
    path: PathBuf,
    header: WalHeader,
    _phantom: PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Opens the segment at `path`, writing a fresh header if the file is
    /// new or empty.
    ///
    /// An existing header is checked for checksum, magic, version and a
    /// segment number matching the file name.
    pub fn open<P: AsRef<Path>>(path: P, max_record_size: Option<u32>) -> Result<Self, WalError> {
        let path = path.as_ref();
        let wal_seq = parse_segment_seq(path)
            .ok_or_else(|| WalError::Internal(format!("bad WAL file name: {}", path.display())))?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                wal_seq,
            );
            file.write_all(&header_bytes_with_crc(&header)?)?;
            file.sync_all()?;
            info!(path = %path.display(), wal_seq, "created WAL segment");
            header
        } else {
            let header = Self::read_header(&mut file)?;
            if header.wal_seq != wal_seq {
                return Err(WalError::InvalidHeader(format!(
                    "sequence {} does not match file name {}",
                    header.wal_seq,
                    path.display()
                )));
            }
            info!(
                path = %path.display(),
                wal_seq,
                max_record_size = header.max_record_size,
                "opened WAL segment"
            );
            header
        };

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            header,
            _phantom: PhantomData,
        })
    }

    fn read_header(file: &mut File) -> Result<WalHeader, WalError> {
        file.seek(SeekFrom::Start(0))?;

        let mut raw = [0u8; WAL_HEADER_SIZE + U32_SIZE];
        file.read_exact(&mut raw).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                WalError::InvalidHeader("truncated header".into())
            } else {
                WalError::Io(e)
            }
        })?;

        let (header_bytes, crc_bytes) = raw.split_at(WAL_HEADER_SIZE);
        let (stored, _) = u32::decode_from(crc_bytes)?;
        if stored != crc32fast::hash(header_bytes) {
            return Err(WalError::InvalidHeader("header checksum mismatch".into()));
        }

        let (header, _) = WalHeader::decode_from(header_bytes)?;
        if header.magic != WalHeader::MAGIC {
            return Err(WalError::InvalidHeader("bad magic".into()));
        }
        if header.version != WalHeader::VERSION {
            return Err(WalError::InvalidHeader(format!(
                "unsupported version {}",
                header.version
            )));
        }
        Ok(header)
    }

    fn lock_file(&self) -> Result<MutexGuard<'_, File>, WalError> {
        self.inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))
    }

    /// Appends one record and fsyncs before returning.
    ///
    /// Frame: `[u32 len LE][record_bytes][u32 crc32(len || record_bytes) LE]`.
    ///
    /// On a failed write or fsync the file is cut back to its previous
    /// length, so a partial frame never precedes later acknowledged records.
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let frame = self.encode_frame(record)?;
        self.write_frame(&frame, |file, frame| file.write_all(frame))
    }

    fn encode_frame(&self, record: &T) -> Result<Vec<u8>, WalError> {
        let record_bytes = encoding::encode_to_vec(record)?;
        if record_bytes.len() > self.header.max_record_size as usize {
            return Err(WalError::RecordTooLarge(record_bytes.len()));
        }
        let len_bytes = (record_bytes.len() as u32).to_le_bytes();

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(&record_bytes);
        let checksum = hasher.finalize();

        let mut frame = Vec::with_capacity(record_bytes.len() + 2 * U32_SIZE);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&record_bytes);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    /// Writes `frame` through `write`, fsyncs, and rolls back on failure.
    fn write_frame(
        &self,
        frame: &[u8],
        write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
    ) -> Result<(), WalError> {
        let mut guard = self.lock_file()?;
        let prev_len = guard.metadata()?.len();

        let result = write(&mut *guard, frame).and_then(|()| guard.sync_all());
        if let Err(e) = result {
            warn!(
                path = %self.path.display(),
                prev_len,
                error = %e,
                "WAL append failed, rolling back partial frame"
            );
            if let Err(rollback) = guard.set_len(prev_len).and_then(|()| guard.sync_all()) {
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial WAL frame"
                );
            }
            return Err(WalError::Io(e));
        }

        trace!(
            path = %self.path.display(),
            len = frame.len() - 2 * U32_SIZE,
            "appended WAL record"
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn append_with(
        &self,
        record: &T,
        write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
    ) -> Result<(), WalError> {
        let frame = self.encode_frame(record)?;
        self.write_frame(&frame, write)
    }

    /// Streaming replay of all records, starting after the header.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        Ok(WalIter {
            file: Arc::clone(&self.inner_file),
            offset: WAL_DATA_OFFSET,
            max_record_size: self.header.max_record_size as usize,
            done: false,
            _phantom: PhantomData,
        })
    }

    /// Replays the valid prefix of the log and cuts off anything after it.
    ///
    /// A torn or corrupt record ends replay without an error; the file is
    /// truncated to the last good frame boundary.
    pub fn recover(&self) -> Result<Vec<T>, WalError> {
        let mut iter = self.replay_iter()?;
        let mut records = Vec::new();

        loop {
            match iter.next() {
                None => break,
                Some(Ok(record)) => records.push(record),
                Some(Err(WalError::Io(e))) => return Err(WalError::Io(e)),
                Some(Err(e)) => {
                    let valid_end = iter.offset();
                    warn!(
                        path = %self.path.display(),
                        valid_end,
                        recovered = records.len(),
                        error = %e,
                        "discarding invalid WAL tail"
                    );
                    let guard = self.lock_file()?;
                    guard.set_len(valid_end)?;
                    guard.sync_all()?;
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Drops every record, leaving only the header.
    pub fn truncate(&self) -> Result<(), WalError> {
        let header = header_bytes_with_crc(&self.header)?;

        let mut guard = self.lock_file()?;
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.write_all(&header)?;
        guard.sync_all()?;

        info!(path = %self.path.display(), "truncated WAL");
        Ok(())
    }

    /// Current file length in bytes, header included.
    pub fn file_size(&self) -> Result<u64, WalError> {
        Ok(self.lock_file()?.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.header.wal_seq
    }

    pub fn max_record_size(&self) -> u32 {
        self.header.max_record_size
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        let guard = match self.inner_file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = guard.sync_all() {
            error!(path = %self.path.display(), error = %e, "failed to sync WAL on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming replay over a [`Wal`].
///
/// Yields `Err` once for the first invalid frame and then stops. After an
/// error [`WalIter::offset`] still points at the start of the bad frame,
/// which is the end of the valid prefix.
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    done: bool,
    _phantom: PhantomData<T>,
}

impl<T: WalData> WalIter<T> {
    /// Byte offset of the next frame to read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_frame(&mut self) -> Result<Option<T>, WalError> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.seek(SeekFrom::Start(self.offset))?;

        let mut len_bytes = [0u8; U32_SIZE];
        let mut filled = 0;
        while filled < U32_SIZE {
            match guard.read(&mut len_bytes[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(WalError::UnexpectedEof),
                n => filled += n,
            }
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Err(WalError::RecordTooLarge(record_len));
        }

        let mut body = vec![0u8; record_len + U32_SIZE];
        guard.read_exact(&mut body).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                WalError::UnexpectedEof
            } else {
                WalError::Io(e)
            }
        })?;
        drop(guard);

        let (record_bytes, crc_bytes) = body.split_at(record_len);
        let (stored, _) = u32::decode_from(crc_bytes)?;

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(record_bytes);
        if hasher.finalize() != stored {
            return Err(WalError::ChecksumMismatch);
        }

        let (record, _) = T::decode_from(record_bytes)?;
        self.offset += (U32_SIZE + record_len + U32_SIZE) as u64;
        Ok(Some(record))
    }
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
