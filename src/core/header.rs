use crate::error::{PakError, Result};
use crate::record::{BlockEntry, NameEntry, Record};

pub const MAGIC: [u8; 3] = *b"FHD";
pub const VERSION: u8 = 1;

/// Allocation granularity of the payload region
pub const CLUSTER_SIZE: u64 = 4096;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Round `length` up to a whole number of clusters
pub const fn round_up(length: u64) -> u64 {
    (length + CLUSTER_SIZE - 1) / CLUSTER_SIZE * CLUSTER_SIZE
}

/// Number of clusters needed to hold `length` bytes
pub const fn clusters_for(length: u64) -> u64 {
    round_up(length) / CLUSTER_SIZE
}

/// Container header (offset 0)
///
/// Written once at creation and rewritten whenever `block_count` changes.
/// Fields are private; updates go through `with_*` constructors that return
/// a new value.
///
/// # Layout
///
/// ```text
/// 0..3    magic "FHD"
/// 3       version
/// 4..8    obfuscation seed
/// 8..12   max_entries   (i32 LE)
/// 12..16  max_blocks    (i32 LE)
/// 16..20  block_count   (i32 LE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    magic: [u8; 3],
    version: u8,
    seed: [u8; 4],
    max_entries: i32,
    max_blocks: i32,
    block_count: i32,
}

impl Header {
    /// Create a header for a fresh container with no blocks
    pub fn new(seed: [u8; 4], max_entries: i32, max_blocks: i32) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            seed,
            max_entries,
            max_blocks,
            block_count: 0,
        }
    }

    pub fn with_block_count(self, block_count: i32) -> Self {
        Header {
            block_count,
            ..self
        }
    }

    pub fn magic(&self) -> [u8; 3] {
        self.magic
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn seed(&self) -> [u8; 4] {
        self.seed
    }

    pub fn max_entries(&self) -> i32 {
        self.max_entries
    }

    pub fn max_blocks(&self) -> i32 {
        self.max_blocks
    }

    pub fn block_count(&self) -> i32 {
        self.block_count
    }

    /// Validate magic, version and table counts
    ///
    /// `block_count == 0` is accepted: a container that never stored a file
    /// has no block records yet.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(PakError::InvalidMagic);
        }

        if self.version != VERSION {
            return Err(PakError::UnsupportedVersion(self.version));
        }

        if self.max_entries <= 0 || self.max_entries > self.max_blocks {
            return Err(PakError::CorruptHeader(format!(
                "max entries ({}) must be in 1..={}",
                self.max_entries, self.max_blocks
            )));
        }

        if self.block_count < 0 || self.block_count > self.max_blocks {
            return Err(PakError::CorruptHeader(format!(
                "block count ({}) exceeds max blocks ({})",
                self.block_count, self.max_blocks
            )));
        }

        Ok(())
    }

    /// Byte offset of block record `index`
    pub fn block_entry_offset(&self, index: u32) -> u64 {
        HEADER_SIZE as u64 + index as u64 * BlockEntry::SIZE as u64
    }

    /// Byte offset of name record `index`
    pub fn name_entry_offset(&self, index: u32) -> u64 {
        self.block_entry_offset(self.max_blocks as u32) + index as u64 * NameEntry::SIZE as u64
    }

    /// First byte past the name table
    pub fn tables_end(&self) -> u64 {
        self.name_entry_offset(self.max_entries as u32)
    }

    /// Start of the payload region (first cluster boundary at or after the tables)
    pub fn data_offset(&self) -> u64 {
        round_up(self.tables_end())
    }
}

impl Record for Header {
    const SIZE: usize = HEADER_SIZE;

    fn encode(&self, out: &mut [u8]) {
        out[0..3].copy_from_slice(&self.magic);
        out[3] = self.version;
        out[4..8].copy_from_slice(&self.seed);
        out[8..12].copy_from_slice(&self.max_entries.to_le_bytes());
        out[12..16].copy_from_slice(&self.max_blocks.to_le_bytes());
        out[16..20].copy_from_slice(&self.block_count.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(PakError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut magic = [0u8; 3];
        magic.copy_from_slice(&bytes[0..3]);
        let mut seed = [0u8; 4];
        seed.copy_from_slice(&bytes[4..8]);

        Ok(Header {
            magic,
            version: bytes[3],
            seed,
            max_entries: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            max_blocks: i32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            block_count: i32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        })
    }
}
