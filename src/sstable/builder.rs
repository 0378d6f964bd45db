//! Run writer: builds a complete sorted run from one sorted record stream.
//!
//! # Input requirements
//!
//! Records must arrive in strictly increasing key order, one version per
//! key. Both the flush path (a memtable holds one entry per key) and
//! compaction (which keeps only the newest version) produce such streams;
//! anything else is rejected.
//!
//! # Atomicity
//!
//! 1. Write everything to `path.tmp`.
//! 2. Flush and fsync the file.
//! 3. Rename `path.tmp` to `path` and fsync the directory.
//!
//! A crash never leaves a partially written run under its final name; a
//! leftover `.tmp` is swept on the next open.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Seek, Write},
    mem,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use bloomfilter::Bloom;
use tracing::info;

use crate::encoding::{self, Encode};
use crate::engine::utils::Record;
use crate::manifest::fsync_dir;

use super::{
    BlockHandle, META_BLOOM, META_PROPERTIES, MetaIndexEntry, SST_BLOCK_CHECKSUM_SIZE,
    SST_BLOCK_LEN_SIZE, SST_BLOOM_FILTER_FALSE_POSITIVE_RATE, SST_DATA_BLOCK_MAX_SIZE,
    SST_FOOTER_SIZE, SST_FORMAT_VERSION, SSTableCell, SSTableError, SSTableFooter, SSTableHeader,
    SSTableIndexEntry, SSTablePropertiesBlock,
};

// ------------------------------------------------------------------------------------------------
// BuildStats: accumulates metadata during run construction
// ------------------------------------------------------------------------------------------------

struct BuildStats {
    record_count: u64,
    tombstone_count: u64,
    min_lsn: u64,
    max_lsn: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
}

impl BuildStats {
    fn new() -> Self {
        Self {
            record_count: 0,
            tombstone_count: 0,
            min_lsn: u64::MAX,
            max_lsn: 0,
            min_key: None,
            max_key: None,
        }
    }

    fn track(&mut self, record: &Record) {
        self.record_count += 1;
        if record.is_delete() {
            self.tombstone_count += 1;
        }
        self.min_lsn = self.min_lsn.min(record.lsn());
        self.max_lsn = self.max_lsn.max(record.lsn());
        if self.min_key.is_none() {
            self.min_key = Some(record.key().to_vec());
        }
    }

    fn into_properties(self) -> SSTablePropertiesBlock {
        let creation_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        SSTablePropertiesBlock {
            creation_timestamp,
            record_count: self.record_count,
            tombstone_count: self.tombstone_count,
            min_lsn: self.min_lsn,
            max_lsn: self.max_lsn,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Data block builder
// ------------------------------------------------------------------------------------------------

/// Accumulates cells and their offsets for one data block.
#[derive(Default)]
struct DataBlockBuilder {
    body: Vec<u8>,
    offsets: Vec<u32>,
    first_key: Option<Vec<u8>>,
}

impl DataBlockBuilder {
    fn add(&mut self, record: &Record) -> Result<(), SSTableError> {
        let value = record.value().unwrap_or_default();
        let cell = SSTableCell {
            key_len: u32::try_from(record.key().len())
                .map_err(|_| SSTableError::Internal("key too large".into()))?,
            value_len: u32::try_from(value.len())
                .map_err(|_| SSTableError::Internal("value too large".into()))?,
            is_delete: record.is_delete(),
            lsn: record.lsn(),
        };

        let offset = u32::try_from(self.body.len())
            .map_err(|_| SSTableError::Internal("data block too large".into()))?;
        self.offsets.push(offset);
        cell.encode_to(&mut self.body)?;
        self.body.extend_from_slice(record.key());
        self.body.extend_from_slice(value);

        if self.first_key.is_none() {
            self.first_key = Some(record.key().to_vec());
        }
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.body.len() + self.offsets.len() * 4 >= SST_DATA_BLOCK_MAX_SIZE
    }

    fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns `(first_key, block_bytes)` and resets the builder.
    fn finish(&mut self) -> Result<(Vec<u8>, Vec<u8>), SSTableError> {
        let Self {
            mut body,
            offsets,
            first_key,
        } = mem::take(self);

        for offset in &offsets {
            offset.encode_to(&mut body)?;
        }
        (offsets.len() as u32).encode_to(&mut body)?;

        let first_key =
            first_key.ok_or_else(|| SSTableError::Internal("finishing empty block".into()))?;
        Ok((first_key, body))
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Writes `[u32 len][data][u32 crc32(data)]` and returns its handle.
fn write_checksummed_block(
    writer: &mut (impl Write + Seek),
    data: &[u8],
) -> Result<BlockHandle, SSTableError> {
    let offset = writer.stream_position()?;
    let len = u32::try_from(data.len())
        .map_err(|_| SSTableError::Internal("block exceeds u32::MAX".into()))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&crc32fast::hash(data).to_le_bytes())?;

    Ok(BlockHandle {
        offset,
        size: (SST_BLOCK_LEN_SIZE + data.len() + SST_BLOCK_CHECKSUM_SIZE) as u64,
    })
}

fn write_header(writer: &mut impl Write) -> Result<(), SSTableError> {
    let zeroed = encoding::encode_to_vec(&SSTableHeader::current())?;
    let header = SSTableHeader::current().with_crc(crc32fast::hash(&zeroed));
    writer.write_all(&encoding::encode_to_vec(&header)?)?;
    Ok(())
}

fn write_data_blocks(
    writer: &mut (impl Write + Seek),
    records: impl Iterator<Item = Record>,
    bloom: &mut Bloom<[u8]>,
) -> Result<(BuildStats, Vec<SSTableIndexEntry>), SSTableError> {
    let mut stats = BuildStats::new();
    let mut index = Vec::new();
    let mut block = DataBlockBuilder::default();
    let mut last_key: Option<Vec<u8>> = None;

    for record in records {
        if let Some(prev) = &last_key {
            if record.key() <= prev.as_slice() {
                return Err(SSTableError::Internal(
                    "records must be in strictly increasing key order".into(),
                ));
            }
        }

        stats.track(&record);
        bloom.set(record.key());
        block.add(&record)?;

        if block.is_full() {
            let (separator_key, bytes) = block.finish()?;
            let handle = write_checksummed_block(writer, &bytes)?;
            index.push(SSTableIndexEntry {
                separator_key,
                handle,
            });
        }

        last_key = Some(match record {
            Record::Put { key, .. } | Record::Delete { key, .. } => key,
        });
    }

    if !block.is_empty() {
        let (separator_key, bytes) = block.finish()?;
        let handle = write_checksummed_block(writer, &bytes)?;
        index.push(SSTableIndexEntry {
            separator_key,
            handle,
        });
    }

    stats.max_key = last_key;
    Ok((stats, index))
}

fn write_metaindex(
    writer: &mut (impl Write + Seek),
    bloom: BlockHandle,
    properties: BlockHandle,
) -> Result<BlockHandle, SSTableError> {
    let entries = [
        MetaIndexEntry {
            name: META_BLOOM.to_string(),
            handle: bloom,
        },
        MetaIndexEntry {
            name: META_PROPERTIES.to_string(),
            handle: properties,
        },
    ];

    let mut bytes = Vec::new();
    encoding::encode_vec(&entries, &mut bytes)?;
    write_checksummed_block(writer, &bytes)
}

fn write_footer(
    writer: &mut (impl Write + Seek),
    metaindex: BlockHandle,
    index: BlockHandle,
) -> Result<(), SSTableError> {
    let footer_offset = writer.stream_position()?;

    let mut footer = SSTableFooter {
        metaindex,
        index,
        total_file_size: footer_offset + SST_FOOTER_SIZE as u64,
        version: SST_FORMAT_VERSION,
        footer_crc32: 0,
    };
    footer.footer_crc32 = crc32fast::hash(&encoding::encode_to_vec(&footer)?);

    writer.write_all(&encoding::encode_to_vec(&footer)?)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// SstWriter: public entry point
// ------------------------------------------------------------------------------------------------

/// Builds one run file at a fixed path.
pub struct SstWriter<P: AsRef<Path>> {
    path: P,
}

impl<P: AsRef<Path>> SstWriter<P> {
    pub fn new(path: P) -> Self {
        Self { path }
    }

    /// Writes `records` (strictly increasing keys) as a run.
    ///
    /// `expected_count` sizes the bloom filter; it should be the number of
    /// records but only needs to be an estimate. Returns the properties of
    /// the written run. An empty stream is an error.
    pub fn build(
        self,
        records: impl Iterator<Item = Record>,
        expected_count: usize,
    ) -> Result<SSTablePropertiesBlock, SSTableError> {
        let mut records = records.peekable();
        if records.peek().is_none() {
            return Err(SSTableError::Internal(
                "Empty iterators cannot build SSTable".into(),
            ));
        }

        let final_path = self.path.as_ref();
        let tmp_path = final_path.with_extension("tmp");

        let result = Self::write_tmp(&tmp_path, records, expected_count);
        let properties = match result {
            Ok(properties) => properties,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        fs::rename(&tmp_path, final_path)?;
        if let Some(dir) = final_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fsync_dir(dir)?;
        }

        info!(
            path = %final_path.display(),
            records = properties.record_count,
            tombstones = properties.tombstone_count,
            "SSTable written"
        );
        Ok(properties)
    }

    fn write_tmp(
        tmp_path: &Path,
        records: impl Iterator<Item = Record>,
        expected_count: usize,
    ) -> Result<SSTablePropertiesBlock, SSTableError> {
        let file: File = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut writer = BufWriter::new(file);

        // 1. Header
        write_header(&mut writer)?;

        // 2. Data blocks, bloom filter contents and stats
        let mut bloom: Bloom<[u8]> =
            Bloom::new_for_fp_rate(expected_count.max(1), SST_BLOOM_FILTER_FALSE_POSITIVE_RATE)
                .map_err(|e| SSTableError::Internal(e.to_string()))?;
        let (stats, index) = write_data_blocks(&mut writer, records, &mut bloom)?;

        // 3. Bloom filter block
        let bloom_handle = write_checksummed_block(&mut writer, bloom.as_slice())?;

        // 4. Properties block
        let properties = stats.into_properties();
        let properties_handle =
            write_checksummed_block(&mut writer, &encoding::encode_to_vec(&properties)?)?;

        // 5. Metaindex block
        let metaindex_handle = write_metaindex(&mut writer, bloom_handle, properties_handle)?;

        // 6. Index block
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&index, &mut index_bytes)?;
        let index_handle = write_checksummed_block(&mut writer, &index_bytes)?;

        // 7. Footer, then make it durable
        write_footer(&mut writer, metaindex_handle, index_handle)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| SSTableError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(properties)
    }
}
