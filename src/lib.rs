//! # fhdpak - Packed Single-File Containers
//!
//! `fhdpak` stores many named binary files in one container medium and
//! lets callers create, read, rename and delete them in place:
//!
//! - **Cluster allocation** with smallest-fit reuse and free-block coalescing
//! - **Obfuscated names** (reversible XOR against a per-container seed)
//! - **Pluggable media**: files on disk or shared in-memory buffers
//! - **Registry** of open containers keyed by normalized path
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fhdpak::{Access, ContainerBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut pak = ContainerBuilder::new()
//!     .path("assets.pak")
//!     .max_entries(128)
//!     .max_blocks(256)
//!     .create()?
//!     .expect("medium is writable");
//!
//! pak.write_file("textures/hero.png", b"...")?;
//! let content = pak.read_file("textures/hero.png")?;
//!
//! // Closed automatically on drop
//! # Ok(())
//! # }
//! ```
//!
//! ## Registry
//!
//! ```rust,no_run
//! use fhdpak::{Access, ContainerRegistry, RegistryConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let mut registry = ContainerRegistry::filesystem(RegistryConfig::default());
//!
//! if let Some(pak) = registry.load("data/main.pak", Access::Read)? {
//!     for info in pak.lock().get_all_file_infos()? {
//!         println!("{} ({} bytes)", info.name, info.length);
//!     }
//! }
//!
//! registry.shutdown_all()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocator, config, container, error, header, io, names, record, registry, validation,
};

pub use crate::core::{
    config::{ContainerBuilder, ContainerOptions, RegistryConfig},
    container::{Container, ContainerStats, FileInfo},
    error::{PakError, Result},
    header::{Header, CLUSTER_SIZE},
    io::{
        Access, ChannelFactory, FileChannel, FsChannelFactory, IoChannel, MemoryChannel,
        MemoryChannelFactory,
    },
    registry::{ContainerHandle, ContainerRegistry},
};
