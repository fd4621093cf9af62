//! Block table allocator
//!
//! Owns the in-memory mirror of the block table and persists every record
//! it changes.

use tracing::{debug, warn};

use super::free_list::FreeLengthMap;
use crate::error::{PakError, Result};
use crate::header::{clusters_for, round_up, Header, CLUSTER_SIZE};
use crate::io::IoChannel;
use crate::record::{write_record, BlockEntry};

/// Cluster-granular allocator over the block table
///
/// Allocation takes the smallest free length that fits (oldest block first
/// within that length), splitting off the unused tail. With nothing free it
/// appends a block at the end of the medium. Freed blocks coalesce with a
/// free neighbour on either side.
#[derive(Debug)]
pub struct BlockAllocator {
    layout: Header,
    blocks: Vec<BlockEntry>,
    free: FreeLengthMap,
    max_blocks: u32,
}

impl BlockAllocator {
    /// Empty allocator for a fresh container
    pub fn new(layout: Header) -> Self {
        BlockAllocator {
            max_blocks: layout.max_blocks().max(0) as u32,
            layout,
            blocks: Vec::new(),
            free: FreeLengthMap::new(),
        }
    }

    /// Rebuild from the block records read on load
    ///
    /// `medium_length` bounds every reservation, free blocks included.
    pub fn from_entries(
        layout: Header,
        entries: Vec<BlockEntry>,
        medium_length: u64,
    ) -> Result<Self> {
        let mut allocator = Self::new(layout);
        if entries.len() > allocator.max_blocks as usize {
            return Err(PakError::CorruptTable(format!(
                "{} block records exceed max blocks ({})",
                entries.len(),
                allocator.max_blocks
            )));
        }

        for (index, entry) in entries.iter().enumerate() {
            if entry.cluster_index() < 0 || entry.length() < 0 {
                return Err(PakError::CorruptTable(format!(
                    "block {} has negative cluster or length",
                    index
                )));
            }
            if entry.is_free() {
                let entry = entry.released();
                allocator.free.insert(entry.capacity(), index as u32);
                allocator.blocks.push(entry);
            } else {
                allocator.blocks.push(*entry);
            }
        }

        allocator.validate(medium_length)?;
        Ok(allocator)
    }

    pub fn block(&self, index: u32) -> Option<BlockEntry> {
        self.blocks.get(index as usize).copied()
    }

    pub fn blocks(&self) -> &[BlockEntry] {
        &self.blocks
    }

    /// Number of block records in use or recycled
    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// Free blocks that own storage
    pub fn free_block_count(&self) -> usize {
        self.free.storage_count()
    }

    /// Recyclable zero-length slots
    pub fn free_slot_count(&self) -> usize {
        self.free.slot_count()
    }

    pub fn free_bytes(&self) -> u64 {
        self.free.free_bytes()
    }

    /// Check that every reservation lies in the payload region, ends within
    /// `medium_length` and the addressable clusters, and overlaps no other
    pub fn validate(&self, medium_length: u64) -> Result<()> {
        let data_offset = self.layout.data_offset();
        let mut ranges: Vec<(u64, u64, usize)> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.capacity() > 0)
            .map(|(index, entry)| (entry.byte_offset(), entry.byte_end(), index))
            .collect();
        ranges.sort_unstable();

        for &(start, end, index) in &ranges {
            if start < data_offset {
                return Err(PakError::CorruptTable(format!(
                    "block {} starts inside the table region",
                    index
                )));
            }
            if end / CLUSTER_SIZE > i32::MAX as u64 {
                return Err(PakError::CorruptTable(format!(
                    "block {} runs past the last addressable cluster",
                    index
                )));
            }
            if end > medium_length {
                return Err(PakError::CorruptTable(format!(
                    "block {} ends past the medium ({} > {} bytes)",
                    index, end, medium_length
                )));
            }
        }

        for pair in ranges.windows(2) {
            let (_, end, a) = pair[0];
            let (start, _, b) = pair[1];
            if start < end {
                return Err(PakError::CorruptTable(format!(
                    "blocks {} and {} overlap",
                    a, b
                )));
            }
        }

        Ok(())
    }

    /// Reserve a block of `length` bytes owned by name slot `name_index`
    ///
    /// On any failure the in-memory table is unchanged. Capacity failures
    /// (`OutOfBlocks`, `OutOfSpace`) also leave the medium as it was.
    pub fn allocate(
        &mut self,
        channel: &mut dyn IoChannel,
        length: u64,
        name_index: u32,
    ) -> Result<u32> {
        if length > i32::MAX as u64 {
            return Err(PakError::OutOfSpace);
        }

        if length == 0 {
            return self.allocate_empty(channel, name_index);
        }

        let rounded = round_up(length);
        match self.free.find_at_least(rounded) {
            Some((found, index)) if found == rounded => {
                let entry = self.blocks[index as usize]
                    .with_name_index(name_index as i32)
                    .with_length(length as i32);
                self.commit(channel, &[(index, entry)])?;
                self.free.remove(found, index);
                debug!("Reused free block {} ({} bytes)", index, found);
                Ok(index)
            }
            Some((found, index)) => self.split(channel, index, found, length, name_index),
            None => self.grow(channel, length, name_index),
        }
    }

    /// Zero-length files take a slot but no clusters
    fn allocate_empty(&mut self, channel: &mut dyn IoChannel, name_index: u32) -> Result<u32> {
        let (index, cluster) = match self.free.peek_slot() {
            Some(slot) => (slot, self.blocks[slot as usize].cluster_index()),
            None => (self.next_slot()?, self.end_cluster(channel)?),
        };

        let entry = BlockEntry::new(name_index as i32, cluster, 0);
        self.commit(channel, &[(index, entry)])?;
        self.free.remove(0, index);
        debug!("Allocated empty block {}", index);
        Ok(index)
    }

    /// Use the head of a larger free block and file the remainder as a new free block
    fn split(
        &mut self,
        channel: &mut dyn IoChannel,
        index: u32,
        found: u64,
        length: u64,
        name_index: u32,
    ) -> Result<u32> {
        let remainder_index = match self.free.peek_slot() {
            Some(slot) => slot,
            None => self.next_slot().map_err(|err| {
                warn!(
                    "Cannot split free block {}: block table full ({})",
                    index, self.max_blocks
                );
                err
            })?,
        };

        let rounded = round_up(length);
        let original = self.blocks[index as usize];
        let remainder_cluster = i32::try_from(clusters_for(rounded))
            .ok()
            .and_then(|clusters| original.cluster_index().checked_add(clusters))
            .ok_or(PakError::OutOfSpace)?;

        let used = original
            .with_name_index(name_index as i32)
            .with_length(length as i32);
        let remainder = BlockEntry::free(remainder_cluster, (found - rounded) as i32);
        self.commit(channel, &[(index, used), (remainder_index, remainder)])?;

        self.free.remove(found, index);
        self.free.remove(0, remainder_index);
        self.free.insert(found - rounded, remainder_index);

        debug!(
            "Split free block {} ({} bytes): {} used, remainder {} bytes in block {}",
            index,
            found,
            rounded,
            found - rounded,
            remainder_index
        );
        Ok(index)
    }

    /// Append a block at the end of the medium
    fn grow(&mut self, channel: &mut dyn IoChannel, length: u64, name_index: u32) -> Result<u32> {
        let index = match self.free.peek_slot() {
            Some(slot) => slot,
            None => self.next_slot().map_err(|err| {
                warn!("Cannot grow: block table full ({})", self.max_blocks);
                err
            })?,
        };

        let cluster = self.end_cluster(channel)?;
        let clusters = clusters_for(length);
        if cluster as u64 + clusters > i32::MAX as u64 {
            return Err(PakError::OutOfSpace);
        }

        let old_len = channel.len()?;
        let new_len = (cluster as u64 + clusters) * CLUSTER_SIZE;
        if let Err(err) = channel.set_len(new_len) {
            warn!("Cannot grow medium to {} bytes: {}", new_len, err);
            return Err(PakError::OutOfSpace);
        }

        let entry = BlockEntry::new(name_index as i32, cluster, length as i32);
        if let Err(err) = self.commit(channel, &[(index, entry)]) {
            if let Err(undo) = channel.set_len(old_len) {
                warn!("Cannot shrink medium back to {} bytes: {}", old_len, undo);
            }
            return Err(err);
        }
        self.free.remove(0, index);

        debug!(
            "Grew medium to {} bytes for block {} at cluster {}",
            new_len, index, cluster
        );
        Ok(index)
    }

    /// Release block `index` and merge it with adjacent free blocks
    ///
    /// The lower block of a merge survives; absorbed records become
    /// zero-length slots. Every changed record is persisted before the free
    /// map is updated.
    pub fn free(&mut self, channel: &mut dyn IoChannel, index: u32) -> Result<()> {
        let entry = self
            .block(index)
            .ok_or_else(|| PakError::CorruptTable(format!("block {} does not exist", index)))?;
        if entry.is_free() {
            return Err(PakError::CorruptTable(format!(
                "block {} is already free",
                index
            )));
        }

        let released = entry.released();
        if released.capacity() == 0 {
            self.commit(channel, &[(index, released)])?;
            self.free.insert(0, index);
            debug!("Freed empty block {}", index);
            return Ok(());
        }

        let mut before = None;
        let mut after = None;
        for (length, other) in self.free.iter_storage() {
            let candidate = self.blocks[other as usize];
            if before.is_none() && candidate.byte_end() == released.byte_offset() {
                before = Some((length, other));
            } else if after.is_none() && candidate.byte_offset() == released.byte_end() {
                after = Some((length, other));
            }
            if before.is_some() && after.is_some() {
                break;
            }
        }

        if before.is_none() && after.is_none() {
            self.commit(channel, &[(index, released)])?;
            self.free.insert(released.capacity(), index);
            debug!("Freed block {} ({} bytes)", index, released.capacity());
            return Ok(());
        }

        let mut survivor = index;
        let mut start = released.cluster_index();
        let mut total = released.capacity();
        let mut absorbed = Vec::with_capacity(2);

        if let Some((length, other)) = before {
            start = self.blocks[other as usize].cluster_index();
            total += length;
            absorbed.push(index);
            survivor = other;
        }
        if let Some((length, other)) = after {
            total += length;
            absorbed.push(other);
        }

        let mut changes = vec![(survivor, BlockEntry::free(start, total as i32))];
        changes.extend(absorbed.iter().map(|&slot| (slot, BlockEntry::empty_slot())));
        self.commit(channel, &changes)?;

        for (length, other) in before.into_iter().chain(after) {
            self.free.remove(length, other);
        }
        self.free.insert(total, survivor);
        for &slot in &absorbed {
            self.free.insert(0, slot);
        }

        debug!(
            "Freed block {} and coalesced into block {} ({} bytes, absorbed {:?})",
            index, survivor, total, absorbed
        );
        Ok(())
    }

    /// Persist `changes` in order, then apply them to the in-memory table
    ///
    /// If a write fails, records already written are put back as far as the
    /// medium allows and the in-memory table is left untouched. An index
    /// equal to the current block count appends a record.
    fn commit(
        &mut self,
        channel: &mut dyn IoChannel,
        changes: &[(u32, BlockEntry)],
    ) -> Result<()> {
        for (done, &(index, entry)) in changes.iter().enumerate() {
            if let Err(err) = write_record(channel, self.layout.block_entry_offset(index), &entry) {
                for &(index, _) in changes[..=done].iter().rev() {
                    let previous = self.block(index).unwrap_or_else(BlockEntry::empty_slot);
                    let offset = self.layout.block_entry_offset(index);
                    if let Err(undo) = write_record(channel, offset, &previous) {
                        warn!("Cannot restore block record {}: {}", index, undo);
                    }
                }
                return Err(err);
            }
        }

        for &(index, entry) in changes {
            match self.blocks.get_mut(index as usize) {
                Some(slot) => *slot = entry,
                None => self.blocks.push(entry),
            }
        }
        Ok(())
    }

    /// Index a new record slot would take, if the table has room
    fn next_slot(&self) -> Result<u32> {
        if self.blocks.len() >= self.max_blocks as usize {
            return Err(PakError::OutOfBlocks);
        }
        Ok(self.blocks.len() as u32)
    }

    /// First cluster at or past the end of the medium
    fn end_cluster(&self, channel: &mut dyn IoChannel) -> Result<i32> {
        let end = round_up(channel.len()?.max(self.layout.data_offset()));
        i32::try_from(end / CLUSTER_SIZE).map_err(|_| PakError::OutOfSpace)
    }
}
