//! Run iterators: within one block and across a key range.
//!
//! - [`BlockIterator`] decodes a single data block. Cells are addressed
//!   through the block's offset array, so both `seek_to` and `get` are
//!   binary searches.
//! - [`ScanIterator`] walks the blocks of one run over `[start, end)`,
//!   loading each block only when the previous one is exhausted.
//!
//! Neither iterator resolves versions across runs; that is the job of
//! [`MergeIterator`](crate::engine::utils::MergeIterator) and
//! [`VisibilityFilter`](crate::engine::VisibilityFilter).

use std::{cmp::Ordering, ops::Deref, sync::Arc};

use tracing::warn;

use crate::encoding::{self, Decode};
use crate::engine::utils::Record;

use super::{SSTable, SSTableCell, SSTableError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// One decoded cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub is_delete: bool,
    pub lsn: u64,
}

impl BlockEntry {
    pub fn into_record(self) -> Record {
        if self.is_delete {
            Record::Delete {
                key: self.key,
                lsn: self.lsn,
            }
        } else {
            Record::Put {
                key: self.key,
                value: self.value,
                lsn: self.lsn,
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block Iterator
// ------------------------------------------------------------------------------------------------

/// Cursor over the cells of one data block.
pub struct BlockIterator {
    data: Arc<Vec<u8>>,
    /// Start of the offset array, i.e. end of the cell area.
    cells_end: usize,
    count: usize,
    pos: usize,
}

impl BlockIterator {
    /// Parses the block trailer; fails if the offset array does not fit.
    pub fn new(data: Arc<Vec<u8>>) -> Result<Self, SSTableError> {
        let corrupt = || SSTableError::Internal("malformed data block trailer".into());

        let len = data.len();
        if len < U32_SIZE {
            return Err(corrupt());
        }
        let (count, _) = u32::decode_from(&data[len - U32_SIZE..])?;
        let count = count as usize;
        let cells_end = count
            .checked_mul(U32_SIZE)
            .and_then(|array| len.checked_sub(U32_SIZE + array))
            .ok_or_else(corrupt)?;

        Ok(Self {
            data,
            cells_end,
            count,
            pos: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Positions at the first cell whose key is `>= key`.
    pub fn seek_to(&mut self, key: &[u8]) -> Result<(), SSTableError> {
        self.pos = self.lower_bound(key)?;
        Ok(())
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<BlockEntry>, SSTableError> {
        let idx = self.lower_bound(key)?;
        if idx >= self.count {
            return Ok(None);
        }
        let entry = self.entry_at(idx)?;
        Ok((entry.key == key).then_some(entry))
    }

    /// Next cell, or `None` at the end of the block.
    pub fn next_entry(&mut self) -> Result<Option<BlockEntry>, SSTableError> {
        if self.pos >= self.count {
            return Ok(None);
        }
        let entry = self.entry_at(self.pos)?;
        self.pos += 1;
        Ok(Some(entry))
    }

    fn lower_bound(&self, key: &[u8]) -> Result<usize, SSTableError> {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid)?.cmp(key) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        Ok(lo)
    }

    fn cell_at(&self, idx: usize) -> Result<(SSTableCell, usize), SSTableError> {
        let slot = self.cells_end + idx * U32_SIZE;
        let (offset, _) = u32::decode_from(&self.data[slot..slot + U32_SIZE])?;
        let offset = offset as usize;
        if offset >= self.cells_end {
            return Err(SSTableError::Internal("cell offset out of range".into()));
        }

        let (cell, header_len) = encoding::decode_from_slice::<SSTableCell>(&self.data[offset..self.cells_end])?;
        let payload_start = offset + header_len;
        let payload_len = cell.key_len as usize + cell.value_len as usize;
        if payload_start + payload_len > self.cells_end {
            return Err(SSTableError::Internal("cell extends past block".into()));
        }
        Ok((cell, payload_start))
    }

    fn key_at(&self, idx: usize) -> Result<&[u8], SSTableError> {
        let (cell, start) = self.cell_at(idx)?;
        Ok(&self.data[start..start + cell.key_len as usize])
    }

    fn entry_at(&self, idx: usize) -> Result<BlockEntry, SSTableError> {
        let (cell, start) = self.cell_at(idx)?;
        let key_end = start + cell.key_len as usize;
        let value_end = key_end + cell.value_len as usize;
        Ok(BlockEntry {
            key: self.data[start..key_end].to_vec(),
            value: self.data[key_end..value_end].to_vec(),
            is_delete: cell.is_delete,
            lsn: cell.lsn,
        })
    }
}

impl Iterator for BlockIterator {
    type Item = BlockEntry;

    /// Corrupt cells end iteration with a warning.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(pos = self.pos, error = %e, "decode error in data block");
                self.pos = self.count;
                None
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Scan Iterator
// ------------------------------------------------------------------------------------------------

/// Forward scan over one run, restricted to `[start, end)`.
///
/// Generic over how the run is held: `&SSTable` for borrowed scans,
/// `Arc<SSTable>` for scans that must keep the run alive on their own
/// (engine range iterators).
pub struct ScanIterator<S: Deref<Target = SSTable>> {
    sstable: S,
    block_idx: usize,
    block: Option<BlockIterator>,
    end: Option<Vec<u8>>,
    done: bool,
}

impl<S: Deref<Target = SSTable>> ScanIterator<S> {
    /// Positions at `start` (or the first key). An empty, inverted or
    /// non-overlapping range yields nothing.
    pub fn new(sstable: S, start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Result<Self, SSTableError> {
        let disjoint = match (&start, &end) {
            (Some(s), Some(e)) if s >= e => true,
            _ => {
                let props = &sstable.properties;
                start.as_deref().is_some_and(|s| s > props.max_key.as_slice())
                    || end.as_deref().is_some_and(|e| e <= props.min_key.as_slice())
            }
        };

        let mut iter = Self {
            sstable,
            block_idx: 0,
            block: None,
            end,
            done: disjoint,
        };
        if iter.done || iter.sstable.index.is_empty() {
            iter.done = true;
            return Ok(iter);
        }

        iter.block_idx = match &start {
            Some(s) => iter.sstable.find_block_for_key(s),
            None => 0,
        };
        let mut block = BlockIterator::new(iter.sstable.load_block(iter.block_idx)?)?;
        if let Some(s) = &start {
            block.seek_to(s)?;
        }
        iter.block = Some(block);
        Ok(iter)
    }

    fn advance_block(&mut self) -> Result<bool, SSTableError> {
        self.block_idx += 1;
        if self.block_idx >= self.sstable.index.len() {
            self.block = None;
            return Ok(false);
        }
        self.block = Some(BlockIterator::new(self.sstable.load_block(self.block_idx)?)?);
        Ok(true)
    }

    fn try_next(&mut self) -> Result<Option<Record>, SSTableError> {
        loop {
            let Some(block) = self.block.as_mut() else {
                return Ok(None);
            };

            if let Some(entry) = block.next_entry()? {
                if self.end.as_deref().is_some_and(|end| entry.key.as_slice() >= end) {
                    return Ok(None);
                }
                return Ok(Some(entry.into_record()));
            }

            if !self.advance_block()? {
                return Ok(None);
            }
        }
    }

    /// Like [`Iterator::next`] but surfaces read errors. The iterator is
    /// finished after the first error or the end of the range.
    pub fn next_record(&mut self) -> Result<Option<Record>, SSTableError> {
        if self.done {
            return Ok(None);
        }
        let result = self.try_next();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
            self.block = None;
        }
        result
    }
}

impl<S: Deref<Target = SSTable>> Iterator for ScanIterator<S> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record,
            Err(e) => {
                warn!(id = self.sstable.id, error = %e, "error reading block during scan");
                None
            }
        }
    }
}
