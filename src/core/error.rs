use thiserror::Error;

use crate::io::Access;

#[derive(Error, Debug)]
pub enum PakError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    #[error("Corrupt table: {0}")]
    CorruptTable(String),

    #[error("Invalid capacity: max_entries={max_entries}, max_blocks={max_blocks} (need 0 < entries <= blocks)")]
    InvalidCapacity { max_entries: i64, max_blocks: i64 },

    #[error("File name too long: {0} bytes (max 255)")]
    NameTooLong(usize),

    #[error("File name cannot be empty")]
    EmptyName,

    #[error("Operation requires {required:?} access")]
    AccessDenied { required: Access },

    #[error("Container is closed")]
    Closed,

    #[error("Container already open: {0}")]
    AlreadyOpen(String),

    #[error("Container not open: {0}")]
    NotOpen(String),

    #[error("Block table full")]
    OutOfBlocks,

    #[error("Name table full")]
    OutOfNames,

    #[error("Out of space: medium cannot grow")]
    OutOfSpace,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid path: path cannot be normalized")]
    InvalidPath,
}

impl PakError {
    /// Capacity failures are expected outcomes; the container reports them as
    /// `false`/`None` instead of an error.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            PakError::OutOfBlocks | PakError::OutOfNames | PakError::OutOfSpace
        )
    }

    /// Errors that mark the medium as not a usable container.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PakError::InvalidMagic
                | PakError::UnsupportedVersion(_)
                | PakError::CorruptHeader(_)
                | PakError::CorruptTable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PakError>;
