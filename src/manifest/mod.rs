//! # Manifest Component
//!
//! The manifest is the run catalog of the engine: the durable record of
//! which sorted runs exist, at which level, and which log segments still
//! hold unflushed writes. It tracks:
//!
//! - the active log segment,
//! - frozen log segments waiting for flush (oldest first),
//! - every live sorted run with its level,
//! - the highest durable LSN,
//! - the next run id to allocate.
//!
//! ## Durability strategy
//!
//! Metadata is persisted as a **log of events + periodic snapshot**:
//!
//! 1. **Event log** (`000000.log`) records one [`ManifestEvent`] per
//!    mutation. Every change to the run set is a *single* event, so a
//!    compaction that adds outputs and removes inputs is applied all at
//!    once or not at all.
//! 2. **Snapshot** (`MANIFEST-000001`) is the encoded [`ManifestData`]
//!    followed by a CRC32. A checkpoint writes it to a `.tmp` file, fsyncs,
//!    renames it over the old snapshot and then truncates the event log.
//! 3. On open the snapshot is loaded and the event log is replayed on top
//!    of it. A torn event at the tail is discarded. A snapshot that fails
//!    its checksum fails the open: the catalog is never silently reset.
//!
//! ## Thread safety
//!
//! All mutators take `&self`. The data mutex is held while an event is
//! appended and applied, which also serializes mutators with
//! [`Manifest::checkpoint`].

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::sstable::sstable_file_name;
use crate::wal::{Wal, WalError};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;
use tracing::{debug, error, info};

const SNAPSHOT_FILENAME: &str = "MANIFEST-000001";
const SNAPSHOT_TMP_FILENAME: &str = "MANIFEST-000001.tmp";
/// Single-segment event log, truncated on every checkpoint.
const WAL_FILENAME: &str = "000000.log";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot file failed its checksum.
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest data structures
// ------------------------------------------------------------------------------------------------

/// One sorted run known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestSstEntry {
    pub id: u64,
    pub level: u32,
}

impl ManifestSstEntry {
    /// File name of the run inside the sstable directory.
    pub fn file_name(&self) -> String {
        sstable_file_name(self.id)
    }
}

/// Durable catalog state.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct ManifestData {
    version: u64,
    last_lsn: u64,
    active_wal: u64,
    /// Oldest first.
    frozen_wals: Vec<u64>,
    sstables: Vec<ManifestSstEntry>,
    next_sst_id: u64,
    /// Runtime only: state differs from the last snapshot.
    dirty: bool,
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            last_lsn: 0,
            active_wal: 0,
            frozen_wals: Vec::new(),
            sstables: Vec::new(),
            next_sst_id: 1,
            dirty: false,
        }
    }
}

/// One catalog mutation, as stored in the event log.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEvent {
    /// The active segment `frozen` stops taking writes; `active` replaces it.
    RotateWal { frozen: u64, active: u64 },

    /// Frozen segment `wal` was flushed. `entry` is the new run, `None` when
    /// the segment held nothing worth writing.
    FlushRun {
        entry: Option<ManifestSstEntry>,
        wal: u64,
        last_lsn: u64,
    },

    UpdateLsn { last_lsn: u64 },

    AllocateSstId { id: u64 },

    /// Installs `added` and drops `removed` in one step.
    Compaction {
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    },
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

const EVENT_ROTATE_WAL: u32 = 0;
const EVENT_FLUSH_RUN: u32 = 1;
const EVENT_UPDATE_LSN: u32 = 2;
const EVENT_ALLOCATE_SST_ID: u32 = 3;
const EVENT_COMPACTION: u32 = 4;

impl Encode for ManifestSstEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.level.encode_to(buf)
    }
}

impl Decode for ManifestSstEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (id, n) = u64::decode_from(buf)?;
        let (level, m) = u32::decode_from(&buf[n..])?;
        Ok((Self { id, level }, n + m))
    }
}

impl Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.version.encode_to(buf)?;
        self.last_lsn.encode_to(buf)?;
        self.active_wal.encode_to(buf)?;
        encoding::encode_vec(&self.frozen_wals, buf)?;
        encoding::encode_vec(&self.sstables, buf)?;
        self.next_sst_id.encode_to(buf)
    }
}

impl Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (active_wal, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (frozen_wals, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (sstables, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
        offset += n;
        let (next_sst_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                last_lsn,
                active_wal,
                frozen_wals,
                sstables,
                next_sst_id,
                dirty: false,
            },
            offset,
        ))
    }
}

impl Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::RotateWal { frozen, active } => {
                EVENT_ROTATE_WAL.encode_to(buf)?;
                frozen.encode_to(buf)?;
                active.encode_to(buf)
            }
            ManifestEvent::FlushRun {
                entry,
                wal,
                last_lsn,
            } => {
                EVENT_FLUSH_RUN.encode_to(buf)?;
                entry.encode_to(buf)?;
                wal.encode_to(buf)?;
                last_lsn.encode_to(buf)
            }
            ManifestEvent::UpdateLsn { last_lsn } => {
                EVENT_UPDATE_LSN.encode_to(buf)?;
                last_lsn.encode_to(buf)
            }
            ManifestEvent::AllocateSstId { id } => {
                EVENT_ALLOCATE_SST_ID.encode_to(buf)?;
                id.encode_to(buf)
            }
            ManifestEvent::Compaction { added, removed } => {
                EVENT_COMPACTION.encode_to(buf)?;
                encoding::encode_vec(added, buf)?;
                encoding::encode_vec(removed, buf)
            }
        }
    }
}

impl Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u32::decode_from(buf)?;
        let event = match tag {
            EVENT_ROTATE_WAL => {
                let (frozen, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (active, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                ManifestEvent::RotateWal { frozen, active }
            }
            EVENT_FLUSH_RUN => {
                let (entry, n) = Option::<ManifestSstEntry>::decode_from(&buf[offset..])?;
                offset += n;
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                ManifestEvent::FlushRun {
                    entry,
                    wal,
                    last_lsn,
                }
            }
            EVENT_UPDATE_LSN => {
                let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                ManifestEvent::UpdateLsn { last_lsn }
            }
            EVENT_ALLOCATE_SST_ID => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                ManifestEvent::AllocateSstId { id }
            }
            EVENT_COMPACTION => {
                let (added, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
                offset += n;
                let (removed, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                ManifestEvent::Compaction { added, removed }
            }
            _ => {
                return Err(EncodingError::InvalidTag {
                    tag,
                    type_name: "ManifestEvent",
                });
            }
        };
        Ok((event, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// Event application
// ------------------------------------------------------------------------------------------------

impl ManifestData {
    fn add_sstable(&mut self, entry: ManifestSstEntry) {
        if !self.sstables.iter().any(|e| e.id == entry.id) {
            self.sstables.push(entry);
        }
        if entry.id >= self.next_sst_id {
            self.next_sst_id = entry.id + 1;
        }
    }

    /// Applies one event. Replaying an event twice is harmless.
    fn apply(&mut self, event: &ManifestEvent) {
        match event {
            ManifestEvent::RotateWal { frozen, active } => {
                if !self.frozen_wals.contains(frozen) {
                    self.frozen_wals.push(*frozen);
                }
                self.active_wal = *active;
            }
            ManifestEvent::FlushRun {
                entry,
                wal,
                last_lsn,
            } => {
                if let Some(entry) = entry {
                    self.add_sstable(*entry);
                }
                self.frozen_wals.retain(|w| w != wal);
                self.last_lsn = self.last_lsn.max(*last_lsn);
            }
            ManifestEvent::UpdateLsn { last_lsn } => {
                self.last_lsn = self.last_lsn.max(*last_lsn);
            }
            ManifestEvent::AllocateSstId { id } => {
                if *id >= self.next_sst_id {
                    self.next_sst_id = *id + 1;
                }
            }
            ManifestEvent::Compaction { added, removed } => {
                self.sstables.retain(|e| !removed.contains(&e.id));
                for entry in added {
                    self.add_sstable(*entry);
                }
            }
        }
        self.version += 1;
        self.dirty = true;
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest core
// ------------------------------------------------------------------------------------------------

/// Persistent run catalog.
///
/// Every mutator appends its event to the log (fsynced) before the
/// in-memory state changes, so anything a caller observed survives a crash.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    wal: Wal<ManifestEvent>,
    data: Mutex<ManifestData>,
}

impl Manifest {
    /// Opens (or creates) the catalog in `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let snapshot_path = path.join(SNAPSHOT_FILENAME);
        let mut data = ManifestData::default();
        if snapshot_path.exists() {
            // The event log was truncated when this snapshot was written, so
            // it cannot stand in for it. Refuse to open rather than start
            // from an empty catalog.
            data = Self::read_snapshot(&snapshot_path).inspect_err(|e| {
                error!(
                    path = %snapshot_path.display(),
                    error = %e,
                    "manifest snapshot is unreadable"
                );
            })?;
            info!(path = %snapshot_path.display(), version = data.version, "loaded manifest snapshot");
        }

        let wal = Wal::<ManifestEvent>::open(path.join(WAL_FILENAME), None)?;
        let events = wal.recover()?;
        let replayed = events.len();
        for event in &events {
            data.apply(event);
        }

        info!(
            replayed,
            runs = data.sstables.len(),
            active_wal = data.active_wal,
            frozen_wals = data.frozen_wals.len(),
            last_lsn = data.last_lsn,
            "manifest opened"
        );

        Ok(Self {
            path,
            wal,
            data: Mutex::new(data),
        })
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, ManifestData>, ManifestError> {
        self.data.lock().map_err(|_| {
            error!("manifest mutex poisoned");
            ManifestError::Internal("Mutex poisoned".into())
        })
    }

    /// Logs `event`, then applies it.
    fn commit(&self, event: ManifestEvent) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;
        self.wal.append(&event)?;
        debug!(?event, "manifest event committed");
        data.apply(&event);
        Ok(())
    }

    // --------------------------------------------------------------------
    // Read accessors
    // --------------------------------------------------------------------

    pub fn get_active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.active_wal)
    }

    /// Frozen segments, oldest first.
    pub fn get_frozen_wals(&self) -> Result<Vec<u64>, ManifestError> {
        Ok(self.lock_data()?.frozen_wals.clone())
    }

    pub fn get_sstables(&self) -> Result<Vec<ManifestSstEntry>, ManifestError> {
        Ok(self.lock_data()?.sstables.clone())
    }

    /// Live runs grouped by level.
    pub fn levels(&self) -> Result<BTreeMap<u32, Vec<ManifestSstEntry>>, ManifestError> {
        let data = self.lock_data()?;
        let mut levels: BTreeMap<u32, Vec<ManifestSstEntry>> = BTreeMap::new();
        for entry in &data.sstables {
            levels.entry(entry.level).or_default().push(*entry);
        }
        Ok(levels)
    }

    pub fn get_last_lsn(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.last_lsn)
    }

    pub fn peek_next_sst_id(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_sst_id)
    }

    pub fn version(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.version)
    }

    /// `true` if the state changed since the last checkpoint.
    pub fn is_dirty(&self) -> Result<bool, ManifestError> {
        Ok(self.lock_data()?.dirty)
    }

    // --------------------------------------------------------------------
    // Mutators
    // --------------------------------------------------------------------

    /// Records that `frozen` now waits for flush and `active` takes writes.
    pub fn rotate_wal(&self, frozen: u64, active: u64) -> Result<(), ManifestError> {
        self.commit(ManifestEvent::RotateWal { frozen, active })
    }

    /// Installs the run flushed from segment `wal`, releasing the segment.
    pub fn record_flush(
        &self,
        entry: Option<ManifestSstEntry>,
        wal: u64,
        last_lsn: u64,
    ) -> Result<(), ManifestError> {
        self.commit(ManifestEvent::FlushRun {
            entry,
            wal,
            last_lsn,
        })
    }

    pub fn update_lsn(&self, last_lsn: u64) -> Result<(), ManifestError> {
        self.commit(ManifestEvent::UpdateLsn { last_lsn })
    }

    /// Reserves a run id. Ids are never reused, even across crashes.
    pub fn allocate_sst_id(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let id = data.next_sst_id;
        let event = ManifestEvent::AllocateSstId { id };
        self.wal.append(&event)?;
        data.apply(&event);
        Ok(id)
    }

    /// Swaps compaction inputs for outputs in one event.
    pub fn apply_compaction(
        &self,
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    ) -> Result<(), ManifestError> {
        self.commit(ManifestEvent::Compaction { added, removed })
    }

    /// Writes a snapshot and truncates the event log.
    ///
    /// 1. Encode the state, append its CRC32, write `MANIFEST-000001.tmp`.
    /// 2. fsync, rename over `MANIFEST-000001`, fsync the directory.
    /// 3. Truncate the event log.
    ///
    /// A crash before step 3 leaves a snapshot plus events that are already
    /// contained in it; replaying them again is idempotent.
    pub fn checkpoint(&self) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;

        let mut bytes = encoding::encode_to_vec(&*data)?;
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let tmp_path = self.path.join(SNAPSHOT_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }

        let final_path = self.path.join(SNAPSHOT_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        fsync_dir(&self.path)?;

        self.wal.truncate()?;
        data.dirty = false;

        info!(
            path = %final_path.display(),
            version = data.version,
            runs = data.sstables.len(),
            "manifest checkpoint written"
        );
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<ManifestData, ManifestError> {
        let buf = fs::read(path)?;
        if buf.len() < 4 {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }
        let (payload, crc_bytes) = buf.split_at(buf.len() - 4);
        let (stored, _) = u32::decode_from(crc_bytes)?;
        if stored != crc32fast::hash(payload) {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }
        let data = encoding::decode_from_slice::<ManifestData>(payload)?.0;
        Ok(data)
    }
}

/// Makes renames and creations inside `dir` durable.
pub(crate) fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
