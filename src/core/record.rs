//! Fixed-width on-disk records
//!
//! Every record type has a compile-time size and encodes to little-endian
//! bytes. Decoding only checks lengths; business invariants are validated by
//! the caller.

use std::cell::RefCell;

use crate::error::{PakError, Result};
use crate::header::{round_up, CLUSTER_SIZE};
use crate::io::IoChannel;

/// Longest obfuscated name a slot can hold
pub const NAME_CAPACITY: usize = 255;

pub trait Record: Sized {
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes
    fn encode(&self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::SIZE];
        self.encode(&mut bytes);
        bytes
    }
}

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(NameEntry::SIZE));
}

/// Read and decode one record at `offset`
pub fn read_record<R: Record>(channel: &mut dyn IoChannel, offset: u64) -> Result<R> {
    SCRATCH.with(|scratch| {
        let mut buf = scratch.borrow_mut();
        buf.clear();
        buf.resize(R::SIZE, 0);
        channel.read_exact_at(offset, &mut buf)?;
        R::decode(&buf)
    })
}

/// Encode and write one record at `offset`
pub fn write_record<R: Record>(channel: &mut dyn IoChannel, offset: u64, record: &R) -> Result<()> {
    SCRATCH.with(|scratch| {
        let mut buf = scratch.borrow_mut();
        buf.clear();
        buf.resize(R::SIZE, 0);
        record.encode(&mut buf);
        channel.write_all_at(offset, &buf)
    })
}

fn short_buffer(what: &str) -> PakError {
    PakError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("Insufficient bytes for {}", what),
    ))
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// One slot of the block table
///
/// `name_index >= 0` marks an in-use block whose `length` is the payload
/// size; `-1` marks a free block whose `length` is its cluster-rounded
/// capacity. A free block of length 0 is a recyclable slot owning no clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    name_index: i32,
    cluster_index: i32,
    length: i32,
}

impl BlockEntry {
    pub const FREE: i32 = -1;

    pub fn new(name_index: i32, cluster_index: i32, length: i32) -> Self {
        BlockEntry {
            name_index,
            cluster_index,
            length,
        }
    }

    /// Free block covering `length` bytes (already cluster-rounded)
    pub fn free(cluster_index: i32, length: i32) -> Self {
        Self::new(Self::FREE, cluster_index, length)
    }

    /// Recyclable slot with no storage
    pub fn empty_slot() -> Self {
        Self::free(0, 0)
    }

    pub fn with_name_index(self, name_index: i32) -> Self {
        BlockEntry { name_index, ..self }
    }

    pub fn with_length(self, length: i32) -> Self {
        BlockEntry { length, ..self }
    }

    /// The same byte range marked free, length rounded to its capacity
    pub fn released(self) -> Self {
        Self::free(self.cluster_index, self.capacity() as i32)
    }

    pub fn is_free(&self) -> bool {
        self.name_index < 0
    }

    pub fn name_index(&self) -> Option<u32> {
        u32::try_from(self.name_index).ok()
    }

    pub fn cluster_index(&self) -> i32 {
        self.cluster_index
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    /// Bytes reserved for this block
    pub fn capacity(&self) -> u64 {
        round_up(self.length.max(0) as u64)
    }

    pub fn byte_offset(&self) -> u64 {
        self.cluster_index.max(0) as u64 * CLUSTER_SIZE
    }

    /// First byte past the block's reserved range
    pub fn byte_end(&self) -> u64 {
        self.byte_offset() + self.capacity()
    }
}

impl Record for BlockEntry {
    const SIZE: usize = 12;

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.name_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.cluster_index.to_le_bytes());
        out[8..12].copy_from_slice(&self.length.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(short_buffer("block entry"));
        }
        Ok(BlockEntry {
            name_index: read_i32(bytes, 0),
            cluster_index: read_i32(bytes, 4),
            length: read_i32(bytes, 8),
        })
    }
}

/// One slot of the name table: a length prefix and up to 255 obfuscated bytes
///
/// Bytes past `len` are padding. A zero length marks an empty slot.
#[derive(Clone, PartialEq, Eq)]
pub struct NameEntry {
    len: u8,
    data: [u8; NAME_CAPACITY],
}

impl NameEntry {
    /// Build an entry from obfuscated name bytes laid over `padding`
    pub fn new(obfuscated: &[u8], padding: [u8; NAME_CAPACITY]) -> Result<Self> {
        if obfuscated.len() > NAME_CAPACITY {
            return Err(PakError::NameTooLong(obfuscated.len()));
        }
        let mut data = padding;
        data[..obfuscated.len()].copy_from_slice(obfuscated);
        Ok(NameEntry {
            len: obfuscated.len() as u8,
            data,
        })
    }

    /// Empty slot filled with `padding`
    pub fn empty(padding: [u8; NAME_CAPACITY]) -> Self {
        NameEntry { len: 0, data: padding }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The obfuscated name bytes
    pub fn obfuscated(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Full data area including padding
    pub fn data(&self) -> &[u8; NAME_CAPACITY] {
        &self.data
    }
}

impl std::fmt::Debug for NameEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameEntry").field("len", &self.len).finish()
    }
}

impl Record for NameEntry {
    const SIZE: usize = 1 + NAME_CAPACITY;

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.len;
        out[1..Self::SIZE].copy_from_slice(&self.data);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(short_buffer("name entry"));
        }
        let mut data = [0u8; NAME_CAPACITY];
        data.copy_from_slice(&bytes[1..Self::SIZE]);
        Ok(NameEntry {
            len: bytes[0],
            data,
        })
    }
}
