//! Container engine
//!
//! Provides file operations over one container medium. The engine owns the
//! in-memory mirrors of the header, block table and name table, and
//! persists every record it changes before reporting success.

use crate::allocator::BlockAllocator;
use crate::config::ContainerOptions;
use crate::error::{PakError, Result};
use crate::header::Header;
use crate::io::{Access, IoChannel};
use crate::names::{decode_name, NameTable};
use crate::record::{read_record, write_record, BlockEntry, NameEntry};
use crate::validation::validate_file_name;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Location of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,

    /// Absolute byte offset of the payload in the medium
    pub offset: u64,

    /// Payload length in bytes
    pub length: u64,
}

impl FileInfo {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Container statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub block_count: u32,
    pub max_blocks: u32,
    pub name_count: usize,
    pub max_entries: u32,
    /// Free blocks that own storage
    pub free_blocks: usize,
    pub free_bytes: u64,
    pub medium_length: u64,
}

/// An open container
///
/// Created with [`Container::create`] or [`Container::load`]; after
/// [`Container::shutdown`] every operation fails with [`PakError::Closed`].
/// Callers serialize access; the engine does no locking of its own.
pub struct Container {
    path: PathBuf,
    access: Access,
    channel: Option<Box<dyn IoChannel>>,
    header: Header,
    allocator: BlockAllocator,
    names: NameTable,
    /// Live file name -> block index
    files: HashMap<String, u32>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("open", &self.is_open())
            .field("files", &self.files.len())
            .finish()
    }
}

impl Container {
    /// Write a fresh container to `channel`
    ///
    /// The channel must be writable. Returns `Ok(None)` if the medium cannot
    /// be written; the channel is closed in that case.
    pub fn create<P: Into<PathBuf>>(
        path: P,
        access: Access,
        mut channel: Box<dyn IoChannel>,
        max_entries: u32,
        max_blocks: u32,
    ) -> Result<Option<Self>> {
        ContainerOptions::new(max_entries, max_blocks).validate()?;
        if !access.can_write() {
            return Err(PakError::AccessDenied {
                required: Access::Write,
            });
        }

        let path = path.into();
        let mut seed = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut seed);
        let header = Header::new(seed, max_entries as i32, max_blocks as i32);

        if let Err(err) = init_medium(channel.as_mut(), &header) {
            warn!("Failed to create container at {:?}: {}", path, err);
            let _ = channel.close();
            return Ok(None);
        }

        info!(
            "Created container at {:?} ({} entries, {} blocks)",
            path, max_entries, max_blocks
        );

        Ok(Some(Container {
            path,
            access,
            channel: Some(channel),
            header,
            allocator: BlockAllocator::new(header),
            names: NameTable::new(seed, max_entries),
            files: HashMap::new(),
        }))
    }

    /// Read an existing container from `channel`
    ///
    /// Returns `Ok(None)` if the medium does not hold a valid container; the
    /// channel is closed in that case.
    pub fn load<P: Into<PathBuf>>(
        path: P,
        access: Access,
        mut channel: Box<dyn IoChannel>,
    ) -> Result<Option<Self>> {
        let path = path.into();

        match Self::read_tables(channel.as_mut()) {
            Ok((header, allocator, names, files)) => {
                info!(
                    "Loaded container at {:?} ({} files, {} blocks)",
                    path,
                    files.len(),
                    header.block_count()
                );
                Ok(Some(Container {
                    path,
                    access,
                    channel: Some(channel),
                    header,
                    allocator,
                    names,
                    files,
                }))
            }
            Err(err) if err.is_corruption() || is_truncated(&err) => {
                warn!("Rejected corrupt container at {:?}: {}", path, err);
                let _ = channel.close();
                Ok(None)
            }
            Err(err) => {
                let _ = channel.close();
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn read_tables(
        channel: &mut dyn IoChannel,
    ) -> Result<(Header, BlockAllocator, NameTable, HashMap<String, u32>)> {
        let header: Header = read_record(channel, 0)?;
        header.validate()?;

        let medium_length = channel.len()?;
        if medium_length < header.data_offset() {
            return Err(PakError::CorruptHeader(format!(
                "medium ({} bytes) ends inside the tables ({} bytes)",
                medium_length,
                header.data_offset()
            )));
        }

        let mut entries = Vec::with_capacity(header.block_count() as usize);
        for index in 0..header.block_count() as u32 {
            entries.push(read_record::<BlockEntry>(
                channel,
                header.block_entry_offset(index),
            )?);
        }
        let allocator = BlockAllocator::from_entries(header, entries, medium_length)?;

        let mut used = BTreeMap::new();
        let mut files = HashMap::new();
        for (block_index, entry) in allocator.blocks().iter().enumerate() {
            let Some(name_index) = entry.name_index() else {
                continue;
            };

            if name_index >= header.max_entries() as u32 {
                return Err(PakError::CorruptTable(format!(
                    "block {} points at name slot {} beyond {}",
                    block_index,
                    name_index,
                    header.max_entries()
                )));
            }

            let name_entry: NameEntry =
                read_record(channel, header.name_entry_offset(name_index))?;
            let name = decode_name(&name_entry, header.seed())?.ok_or_else(|| {
                PakError::CorruptTable(format!(
                    "block {} points at empty name slot {}",
                    block_index, name_index
                ))
            })?;

            if used.insert(name_index, name.clone()).is_some() {
                return Err(PakError::CorruptTable(format!(
                    "name slot {} is shared by several blocks",
                    name_index
                )));
            }
            if files.insert(name, block_index as u32).is_some() {
                return Err(PakError::CorruptTable(format!(
                    "duplicate file name in slot {}",
                    name_index
                )));
            }
        }

        let names = NameTable::from_used(header.seed(), header.max_entries() as u32, used);
        Ok((header, allocator, names, files))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Get a reference to the container header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of live files
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.is_none() {
            return Err(PakError::Closed);
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.access.can_read() {
            return Err(PakError::AccessDenied {
                required: Access::Read,
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.access.can_write() {
            return Err(PakError::AccessDenied {
                required: Access::Write,
            });
        }
        Ok(())
    }

    fn info_for(&self, name: &str, block_index: u32) -> Option<FileInfo> {
        let block = self.allocator.block(block_index)?;
        Some(FileInfo {
            name: name.to_string(),
            offset: block.byte_offset(),
            length: block.length().max(0) as u64,
        })
    }

    /// Location of `name`, or `None` if it is not stored
    pub fn get_file_info(&self, name: &str) -> Result<Option<FileInfo>> {
        self.ensure_open()?;
        Ok(self
            .files
            .get(name)
            .and_then(|&block_index| self.info_for(name, block_index)))
    }

    pub fn has_file(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.files.contains_key(name))
    }

    /// Every stored file, ordered by name
    pub fn get_all_file_infos(&self) -> Result<Vec<FileInfo>> {
        self.ensure_open()?;
        let mut infos: Vec<FileInfo> = self
            .files
            .iter()
            .filter_map(|(name, &block_index)| self.info_for(name, block_index))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Read a whole file; absent files read as empty
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        self.read_file_range(name, 0, u64::MAX)
    }

    /// Read up to `length` bytes starting `offset` bytes into the file
    ///
    /// Requests past the end are truncated to the file's length.
    pub fn read_file_range(&mut self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.ensure_readable()?;
        let Some(info) = self.get_file_info(name)? else {
            return Ok(Vec::new());
        };

        let start = offset.min(info.length);
        let count = length.min(info.length - start);
        let mut buf = vec![0u8; count as usize];
        self.read_payload(info.offset + start, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `offset` bytes into the file, returning the count read
    pub fn read_file_into(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_readable()?;
        let Some(info) = self.get_file_info(name)? else {
            return Ok(0);
        };

        let start = offset.min(info.length);
        let count = (buf.len() as u64).min(info.length - start) as usize;
        self.read_payload(info.offset + start, &mut buf[..count])?;
        Ok(count)
    }

    fn read_payload(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        channel.read_exact_at(position, buf)
    }

    /// Store `data` under `name`, replacing any previous content
    ///
    /// Returns `Ok(false)` when a table is full or the medium cannot grow;
    /// nothing stored before is affected in that case.
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        validate_file_name(name)?;

        match self.store(name, data) {
            Ok(()) => {
                debug!("Wrote {} bytes to {}", data.len(), name);
                Ok(true)
            }
            Err(err) if err.is_capacity() => {
                warn!("Cannot write {} ({} bytes): {}", name, data.len(), err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Store everything `reader` yields under `name`
    pub fn write_file_from<R: Read>(&mut self, name: &str, reader: &mut R) -> Result<bool> {
        self.ensure_writable()?;
        validate_file_name(name)?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.write_file(name, &data)
    }

    fn store(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        let length = data.len() as u64;

        if let Some(&old_block) = self.files.get(name) {
            let name_index = self
                .allocator
                .block(old_block)
                .and_then(|block| block.name_index())
                .ok_or_else(|| {
                    PakError::CorruptTable(format!("block {} of {} is free", old_block, name))
                })?;

            let new_block = self.allocator.allocate(channel, length, name_index)?;
            let replaced = write_payload(channel, &self.allocator, new_block, data)
                .and_then(|()| self.allocator.free(channel, old_block));
            if let Err(err) = replaced {
                discard_block(channel, &mut self.allocator, new_block);
                return Err(err);
            }
            self.files.insert(name.to_string(), new_block);
        } else {
            let name_index = self.names.next_index().ok_or(PakError::OutOfNames)?;
            let block = self.allocator.allocate(channel, length, name_index)?;
            if let Err(err) = write_payload(channel, &self.allocator, block, data) {
                discard_block(channel, &mut self.allocator, block);
                return Err(err);
            }

            let (inserted, entry) = match self.names.insert(name) {
                Ok(slot) => slot,
                Err(err) => {
                    discard_block(channel, &mut self.allocator, block);
                    return Err(err);
                }
            };
            debug_assert_eq!(inserted, name_index);
            let offset = self.header.name_entry_offset(inserted);
            if let Err(err) = write_record(channel, offset, &entry) {
                if let Some(cleared) = self.names.release(inserted) {
                    let _ = write_record(channel, offset, &cleared);
                }
                discard_block(channel, &mut self.allocator, block);
                return Err(err);
            }
            self.files.insert(name.to_string(), block);
        }

        self.sync_block_count()?;
        self.flush()
    }

    /// Rewrite the header if block records were appended
    fn sync_block_count(&mut self) -> Result<()> {
        let block_count = self.allocator.block_count() as i32;
        if block_count == self.header.block_count() {
            return Ok(());
        }

        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        let header = self.header.with_block_count(block_count);
        write_record(channel, 0, &header)?;
        self.header = header;
        Ok(())
    }

    /// Give `old_name` the name `new_name`; its payload does not move
    ///
    /// Returns `Ok(false)` if `old_name` is missing or `new_name` is taken.
    pub fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<bool> {
        self.ensure_writable()?;
        validate_file_name(new_name)?;

        if old_name == new_name {
            return Ok(true);
        }
        if self.files.contains_key(new_name) {
            debug!("Cannot rename {} to {}: target exists", old_name, new_name);
            return Ok(false);
        }
        let Some(&block_index) = self.files.get(old_name) else {
            return Ok(false);
        };

        let name_index = self
            .allocator
            .block(block_index)
            .and_then(|block| block.name_index())
            .ok_or_else(|| {
                PakError::CorruptTable(format!("block {} of {} is free", block_index, old_name))
            })?;

        let entry = self.names.rename(name_index, new_name)?;
        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        write_record(channel, self.header.name_entry_offset(name_index), &entry)?;

        self.files.remove(old_name);
        self.files.insert(new_name.to_string(), block_index);
        self.flush()?;

        debug!("Renamed {} to {}", old_name, new_name);
        Ok(true)
    }

    /// Remove `name`; returns `Ok(false)` if it is not stored
    pub fn delete_file(&mut self, name: &str) -> Result<bool> {
        self.ensure_writable()?;

        let Some(&block_index) = self.files.get(name) else {
            return Ok(false);
        };
        let name_index = self
            .allocator
            .block(block_index)
            .and_then(|block| block.name_index())
            .ok_or_else(|| {
                PakError::CorruptTable(format!("block {} of {} is free", block_index, name))
            })?;

        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        if let Some(cleared) = self.names.release(name_index) {
            write_record(channel, self.header.name_entry_offset(name_index), &cleared)?;
        }
        self.allocator.free(channel, block_index)?;
        self.files.remove(name);
        self.flush()?;

        debug!("Deleted {}", name);
        Ok(true)
    }

    /// Copy a file's content to `destination` on the local filesystem
    ///
    /// Returns `Ok(false)` if `name` is not stored.
    pub fn save_as<P: AsRef<Path>>(&mut self, name: &str, destination: P) -> Result<bool> {
        self.ensure_readable()?;
        if !self.files.contains_key(name) {
            return Ok(false);
        }

        let data = self.read_file(name)?;
        std::fs::write(destination.as_ref(), &data)?;
        debug!(
            "Saved {} ({} bytes) to {:?}",
            name,
            data.len(),
            destination.as_ref()
        );
        Ok(true)
    }

    /// Flush the medium
    pub fn flush(&mut self) -> Result<()> {
        let channel = self.channel.as_deref_mut().ok_or(PakError::Closed)?;
        channel.flush()
    }

    /// Get container statistics
    pub fn stats(&self) -> Result<ContainerStats> {
        let channel = self.channel.as_deref().ok_or(PakError::Closed)?;
        Ok(ContainerStats {
            block_count: self.allocator.block_count(),
            max_blocks: self.allocator.max_blocks(),
            name_count: self.names.len(),
            max_entries: self.names.capacity(),
            free_blocks: self.allocator.free_block_count(),
            free_bytes: self.allocator.free_bytes(),
            medium_length: channel.len()?,
        })
    }

    /// Close the medium and drop the in-memory tables
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };

        self.files.clear();
        self.allocator = BlockAllocator::new(self.header);
        self.names = NameTable::new(self.header.seed(), self.names.capacity());

        let flushed = channel.flush();
        channel.close()?;
        flushed?;

        info!("Closed container at {:?}", self.path);
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("Failed to close container at {:?}: {}", self.path, err);
        }
    }
}

/// Lay out an empty container: header, zeroed tables, no payload
fn init_medium(channel: &mut dyn IoChannel, header: &Header) -> Result<()> {
    channel.set_len(0)?;
    channel.set_len(header.data_offset())?;
    write_record(channel, 0, header)?;
    channel.flush()
}

fn write_payload(
    channel: &mut dyn IoChannel,
    allocator: &BlockAllocator,
    block_index: u32,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let block = allocator
        .block(block_index)
        .ok_or_else(|| PakError::CorruptTable(format!("block {} does not exist", block_index)))?;
    channel.write_all_at(block.byte_offset(), data)
}

/// Release a block whose write did not complete
fn discard_block(channel: &mut dyn IoChannel, allocator: &mut BlockAllocator, block_index: u32) {
    if let Err(err) = allocator.free(channel, block_index) {
        warn!("Cannot release unfinished block {}: {}", block_index, err);
    }
}

fn is_truncated(err: &PakError) -> bool {
    matches!(err, PakError::Io(io) if io.kind() == ErrorKind::UnexpectedEof)
}
