//! FHD Container Format
//!
//! A single-file archive holding many named binary files, readable and
//! writable in place.
//!
//! ## Modules
//!
//! - [`error`] - Error types for container operations
//! - [`io`] - Random-access media (file-backed and in-memory)
//! - [`header`] - Container header and table layout
//! - [`record`] - Fixed-width block and name records
//! - [`names`] - Obfuscated name table with slot recycling
//! - [`allocator`] - Cluster allocator with free-block coalescing
//! - [`container`] - The container engine
//! - [`registry`] - Open containers keyed by path
//! - [`config`] - Capacities, registry settings and the builder
//! - [`validation`] - File name and path rules
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Container medium                 │
//! ├─────────────────────────────────────────────┤
//! │ Header (20 bytes)                           │
//! │  - Magic "FHD", version 1, seed             │
//! │  - Max entries, max blocks, block count     │
//! ├─────────────────────────────────────────────┤
//! │ Block table (12 bytes × max blocks)         │
//! │  - Name slot, start cluster, length         │
//! ├─────────────────────────────────────────────┤
//! │ Name table (256 bytes × max entries)        │
//! │  - Length prefix + XOR-obfuscated name      │
//! ├─────────────────────────────────────────────┤
//! │ Payload (4KB clusters, cluster-aligned)     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod config;
pub mod container;
pub mod error;
pub mod header;
pub mod io;
pub mod names;
pub mod record;
pub mod registry;
pub mod validation;

pub use allocator::BlockAllocator;
pub use config::{ContainerBuilder, ContainerOptions, RegistryConfig};
pub use container::{Container, ContainerStats, FileInfo};
pub use error::{PakError, Result};
pub use header::{Header, CLUSTER_SIZE};
pub use registry::{ContainerHandle, ContainerRegistry};
