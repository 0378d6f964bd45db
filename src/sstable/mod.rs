//! Immutable sorted runs.
//!
//! A sorted run (SSTable) is a write-once file holding records sorted by
//! key, at most one version per key. Runs are produced by memtable flushes
//! and by compaction, shared between readers through `Arc`, and deleted
//! only after they have left the catalog *and* the last reader let go.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER: magic "KSST" | version u32 | header_crc u32]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_FILTER_LEN_LE][BLOOM_FILTER_BYTES][BLOOM_FILTER_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER 48 B]
//! ```
//!
//! - **Data block**: cells `[SSTableCell][key][value]` followed by an
//!   offset array `[u32 cell_offset]*n [u32 n]`, so cells can be
//!   binary-searched by ordinal.
//! - **Bloom filter**: built over every key in the run.
//! - **Properties**: record / tombstone counts, LSN and key bounds.
//! - **Metaindex**: named handles (`filter.bloom`, `meta.properties`).
//! - **Index**: the first key of each data block and its handle.
//! - **Footer**: metaindex and index handles, file size, format version and
//!   a CRC32 over the footer itself.
//!
//! Every block carries its own CRC32 and is verified on each read.
//!
//! # Lookups
//!
//! [`SSTable::get`] checks the key bounds and the bloom filter, binary
//! searches the index for the candidate block, then binary searches the
//! cell offsets inside that block. Verified blocks are kept in a per-run
//! `moka` cache.
//!
//! # Sub-modules
//!
//! - [`builder`]: [`SstWriter`], a single-pass writer with `.tmp` + rename.
//! - [`iterator`]: [`BlockIterator`] and the range [`ScanIterator`].

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
mod cache;
mod encoding_impls;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::SstWriter;
pub use iterator::{BlockEntry, BlockIterator, ScanIterator};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bloomfilter::Bloom;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, EncodingError};
use crate::engine::utils::Record;
use cache::BlockCache;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SST_HDR_MAGIC: [u8; 4] = *b"KSST";
const SST_FORMAT_VERSION: u32 = 1;
const SST_HDR_SIZE: usize = 12;
const SST_FOOTER_SIZE: usize = 48;
const SST_BLOOM_FILTER_FALSE_POSITIVE_RATE: f64 = 0.01;
const SST_DATA_BLOCK_MAX_SIZE: usize = 4096;
const SST_BLOCK_LEN_SIZE: usize = 4;
const SST_BLOCK_CHECKSUM_SIZE: usize = 4;

const META_BLOOM: &str = "filter.bloom";
const META_PROPERTIES: &str = "meta.properties";

/// Cached decoded data blocks per run unless configured otherwise.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

pub(crate) struct SSTableHeader {
    magic: [u8; 4],
    version: u32,
    /// CRC32 of the header encoded with this field set to zero.
    header_crc: u32,
}

/// Run-level metadata written at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTablePropertiesBlock {
    /// UNIX epoch nanoseconds.
    pub creation_timestamp: u64,
    pub record_count: u64,
    pub tombstone_count: u64,
    pub min_lsn: u64,
    pub max_lsn: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

pub(crate) struct SSTableIndexEntry {
    /// First key stored in the block.
    pub(crate) separator_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

pub(crate) struct SSTableFooter {
    pub(crate) metaindex: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) version: u32,
    pub(crate) footer_crc32: u32,
}

/// Fixed-size prefix of every cell in a data block.
pub(crate) struct SSTableCell {
    pub(crate) key_len: u32,
    pub(crate) value_len: u32,
    pub(crate) is_delete: bool,
    pub(crate) lsn: u64,
}

/// Offset and size of a framed block (length prefix and checksum included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

#[derive(Debug)]
pub(crate) struct MetaIndexEntry {
    pub(crate) name: String,
    pub(crate) handle: BlockHandle,
}

// ------------------------------------------------------------------------------------------------
// GetResult
// ------------------------------------------------------------------------------------------------

/// What a single run knows about a key.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GetResult {
    Put { value: Vec<u8>, lsn: u64 },
    Delete { lsn: u64 },
    NotFound,
}

impl GetResult {
    /// LSN of the stored version, `0` for [`GetResult::NotFound`].
    pub fn lsn(&self) -> u64 {
        match self {
            Self::Put { lsn, .. } | Self::Delete { lsn } => *lsn,
            Self::NotFound => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable: immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable sorted run.
pub struct SSTable {
    /// Catalog id; `0` until the engine assigns it after [`SSTable::open`].
    pub id: u64,

    /// Catalog level (generation); set by the engine.
    pub level: u32,

    path: PathBuf,
    mmap: Mmap,
    bloom: Bloom<[u8]>,
    pub properties: SSTablePropertiesBlock,
    pub(crate) index: Vec<SSTableIndexEntry>,
    footer: SSTableFooter,
    cache: BlockCache,
    obsolete: AtomicBool,
}

impl SSTable {
    /// Opens a run and verifies header, footer, metaindex, bloom filter,
    /// properties and index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        Self::open_with_cache(path, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Like [`SSTable::open`] with an explicit block cache capacity
    /// (`0` disables caching).
    pub fn open_with_cache(
        path: impl AsRef<Path>,
        cache_capacity: usize,
    ) -> Result<Self, SSTableError> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // SAFETY: runs are never modified after the rename that publishes
        // them, and every slice below is bounds-checked against the map.
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < SST_HDR_SIZE + SST_FOOTER_SIZE {
            return Err(SSTableError::Internal("File too small".into()));
        }

        let (mut header, _) = encoding::decode_from_slice::<SSTableHeader>(&mmap[..SST_HDR_SIZE])?;
        let stored_header_crc = header.header_crc;
        header.header_crc = 0;
        if crc32fast::hash(&encoding::encode_to_vec(&header)?) != stored_header_crc {
            return Err(SSTableError::ChecksumMismatch);
        }
        if header.magic != SST_HDR_MAGIC {
            return Err(SSTableError::Internal("SSTable header magic mismatch".into()));
        }
        if header.version != SST_FORMAT_VERSION {
            return Err(SSTableError::Internal(format!(
                "unsupported SSTable version {}",
                header.version
            )));
        }

        let footer_start = file_len - SST_FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<SSTableFooter>(&mmap[footer_start..])?;
        let stored_footer_crc = footer.footer_crc32;
        footer.footer_crc32 = 0;
        if crc32fast::hash(&encoding::encode_to_vec(&footer)?) != stored_footer_crc {
            return Err(SSTableError::ChecksumMismatch);
        }
        footer.footer_crc32 = stored_footer_crc;
        if footer.version != SST_FORMAT_VERSION {
            return Err(SSTableError::Internal(format!(
                "unsupported SSTable footer version {}",
                footer.version
            )));
        }
        if footer.total_file_size != file_len as u64 {
            return Err(SSTableError::Internal(format!(
                "file size {} does not match footer {}",
                file_len, footer.total_file_size
            )));
        }

        let metaindex_bytes = Self::read_block_bytes(&mmap, &footer.metaindex)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&metaindex_bytes)?;

        let mut bloom_handle = None;
        let mut properties_handle = None;
        for entry in meta_entries {
            match entry.name.as_str() {
                META_BLOOM => bloom_handle = Some(entry.handle),
                META_PROPERTIES => properties_handle = Some(entry.handle),
                other => {
                    return Err(SSTableError::Internal(format!(
                        "unknown metaindex entry {other:?}"
                    )));
                }
            }
        }

        let bloom_handle =
            bloom_handle.ok_or_else(|| SSTableError::Internal("SSTable missing bloom".into()))?;
        let bloom_bytes = Self::read_block_bytes(&mmap, &bloom_handle)?;
        let bloom = Bloom::from_slice(&bloom_bytes).map_err(|e| SSTableError::Internal(e.to_string()))?;

        let properties_handle = properties_handle
            .ok_or_else(|| SSTableError::Internal("SSTable missing properties".into()))?;
        let properties_bytes = Self::read_block_bytes(&mmap, &properties_handle)?;
        let (properties, _) =
            encoding::decode_from_slice::<SSTablePropertiesBlock>(&properties_bytes)?;

        let index_bytes = Self::read_block_bytes(&mmap, &footer.index)?;
        let (index, _) = encoding::decode_vec::<SSTableIndexEntry>(&index_bytes)?;

        debug!(
            path = %path.display(),
            records = properties.record_count,
            blocks = index.len(),
            "opened SSTable"
        );

        Ok(Self {
            id: 0,
            level: 0,
            path: path.to_path_buf(),
            mmap,
            bloom,
            properties,
            index,
            footer,
            cache: BlockCache::new(cache_capacity),
            obsolete: AtomicBool::new(false),
        })
    }

    /// Single-run lookup.
    pub fn get(&self, key: &[u8]) -> Result<GetResult, SSTableError> {
        if !self.key_in_bounds(key) || !self.bloom.check(key) || self.index.is_empty() {
            return Ok(GetResult::NotFound);
        }

        let block = BlockIterator::new(self.load_block(self.find_block_for_key(key))?)?;
        Ok(match block.get(key)? {
            Some(entry) if entry.is_delete => GetResult::Delete { lsn: entry.lsn },
            Some(entry) => GetResult::Put {
                value: entry.value,
                lsn: entry.lsn,
            },
            None => GetResult::NotFound,
        })
    }

    /// Records in `[start, end)` in key order, tombstones included.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<impl Iterator<Item = Record> + use<'_>, SSTableError> {
        ScanIterator::new(self, start.map(<[u8]>::to_vec), end.map(<[u8]>::to_vec))
    }

    pub fn file_size(&self) -> u64 {
        self.footer.total_file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_lsn(&self) -> u64 {
        self.properties.min_lsn
    }

    pub fn max_lsn(&self) -> u64 {
        self.properties.max_lsn
    }

    pub fn bloom_may_contain(&self, key: &[u8]) -> bool {
        self.bloom.check(key)
    }

    /// `(hits, misses)` of the block cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Schedules the file for deletion once the last reference is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    fn key_in_bounds(&self, key: &[u8]) -> bool {
        key >= self.properties.min_key.as_slice() && key <= self.properties.max_key.as_slice()
    }

    /// Returns data block `idx`, verified and possibly cached.
    pub(crate) fn load_block(&self, idx: usize) -> Result<Arc<Vec<u8>>, SSTableError> {
        let entry = self
            .index
            .get(idx)
            .ok_or_else(|| SSTableError::Internal(format!("block index {idx} out of range")))?;

        if let Some(block) = self.cache.get(idx) {
            return Ok(block);
        }

        let block = Arc::new(Self::read_block_bytes(&self.mmap, &entry.handle)?);
        self.cache.insert(idx, Arc::clone(&block));
        Ok(block)
    }

    /// Reads a framed block and verifies its checksum.
    pub(crate) fn read_block_bytes(
        mmap: &Mmap,
        handle: &BlockHandle,
    ) -> Result<Vec<u8>, SSTableError> {
        let out_of_range = || SSTableError::Internal("Block out of range".into());

        let start = usize::try_from(handle.offset).map_err(|_| out_of_range())?;
        let size = usize::try_from(handle.size).map_err(|_| out_of_range())?;
        let end = start.checked_add(size).ok_or_else(out_of_range)?;
        if size < SST_BLOCK_LEN_SIZE + SST_BLOCK_CHECKSUM_SIZE || end > mmap.len() {
            return Err(out_of_range());
        }

        let frame = &mmap[start..end];
        let (content_len, _) = encoding::decode_from_slice::<u32>(frame)?;
        let content_len = content_len as usize;
        if SST_BLOCK_LEN_SIZE + content_len + SST_BLOCK_CHECKSUM_SIZE != size {
            return Err(SSTableError::Internal("Block length mismatch".into()));
        }

        let content = &frame[SST_BLOCK_LEN_SIZE..SST_BLOCK_LEN_SIZE + content_len];
        let (stored, _) = encoding::decode_from_slice::<u32>(&frame[SST_BLOCK_LEN_SIZE + content_len..])?;
        if crc32fast::hash(content) != stored {
            return Err(SSTableError::ChecksumMismatch);
        }

        Ok(content.to_vec())
    }

    /// Index of the block that may hold `key`: the last block whose first
    /// key is `<= key`, or block 0.
    pub(crate) fn find_block_for_key(&self, key: &[u8]) -> usize {
        match self
            .index
            .binary_search_by(|entry| entry.separator_key.as_slice().cmp(key))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(id = self.id, path = %self.path.display(), "removed obsolete SSTable"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                id = self.id,
                path = %self.path.display(),
                error = %e,
                "failed to remove obsolete SSTable"
            ),
        }
    }
}

/// Formats the file name of run `id`.
pub fn sstable_file_name(id: u64) -> String {
    format!("{id:06}.sst")
}
