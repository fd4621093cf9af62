//! Configuration for containers and the registry
//!
//! Table capacities are fixed when a container is created, so they are the
//! only per-container knobs. Registry settings can be loaded from TOML.

use crate::container::Container;
use crate::error::{PakError, Result};
use crate::io::{Access, ChannelFactory, FsChannelFactory};
use crate::validation::normalize_container_key;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Table capacities for a new container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Name slots (maximum number of live files)
    pub max_entries: u32,

    /// Block slots; must be at least `max_entries`
    pub max_blocks: u32,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_blocks: 2048,
        }
    }
}

impl ContainerOptions {
    pub fn new(max_entries: u32, max_blocks: u32) -> Self {
        Self {
            max_entries,
            max_blocks,
        }
    }

    /// Check `0 < max_entries <= max_blocks <= i32::MAX`
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0
            || self.max_entries > self.max_blocks
            || self.max_blocks > i32::MAX as u32
        {
            return Err(PakError::InvalidCapacity {
                max_entries: self.max_entries as i64,
                max_blocks: self.max_blocks as i64,
            });
        }
        Ok(())
    }
}

/// Registry-wide settings
///
/// # Example
///
/// ```toml
/// remove_medium_on_destroy = true
///
/// [defaults]
/// max_entries = 256
/// max_blocks = 512
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Delete the backing medium whenever a container is destroyed
    pub remove_medium_on_destroy: bool,

    /// Capacities used when `create` is called without explicit options
    pub defaults: ContainerOptions,
}

impl RegistryConfig {
    /// Parse from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RegistryConfig =
            toml::from_str(text).map_err(|e| PakError::Config(e.to_string()))?;
        config.defaults.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded registry config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| PakError::Config(e.to_string()))
    }
}

/// Builder for opening a single container
///
/// # Examples
///
/// ```rust,no_run
/// use fhdpak::{Access, ContainerBuilder};
///
/// # fn main() -> fhdpak::Result<()> {
/// let container = ContainerBuilder::new()
///     .path("/data/assets.pak")
///     .access(Access::ReadWrite)
///     .max_entries(256)
///     .max_blocks(512)
///     .create()?;
/// assert!(container.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    path: Option<PathBuf>,
    access: Access,
    options: ContainerOptions,
}

impl ContainerBuilder {
    /// Create a new ContainerBuilder with default capacities and read-write access
    pub fn new() -> Self {
        ContainerBuilder {
            path: None,
            access: Access::ReadWrite,
            options: ContainerOptions::default(),
        }
    }

    /// Set the medium path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn max_entries(mut self, max_entries: u32) -> Self {
        self.options.max_entries = max_entries;
        self
    }

    pub fn max_blocks(mut self, max_blocks: u32) -> Self {
        self.options.max_blocks = max_blocks;
        self
    }

    /// Replace both capacities
    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    fn key(&self) -> Result<PathBuf> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| PakError::Config("path must be set".to_string()))?;
        normalize_container_key(path)
    }

    /// Create a fresh container on a medium from `factory`
    ///
    /// Returns `Ok(None)` if the medium cannot be opened or written.
    pub fn create_with(self, factory: &dyn ChannelFactory) -> Result<Option<Container>> {
        let key = self.key()?;
        self.options.validate()?;
        if !self.access.can_write() {
            return Err(PakError::AccessDenied {
                required: Access::Write,
            });
        }

        let channel = match factory.open(&key, self.access, true) {
            Ok(channel) => channel,
            Err(PakError::Io(err)) => {
                warn!("Cannot create medium {:?}: {}", key, err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        Container::create(
            key,
            self.access,
            channel,
            self.options.max_entries,
            self.options.max_blocks,
        )
    }

    /// Load an existing container from a medium from `factory`
    ///
    /// Returns `Ok(None)` if the medium is missing or not a valid container.
    /// Capacities set on the builder are ignored; they come from the header.
    pub fn load_with(self, factory: &dyn ChannelFactory) -> Result<Option<Container>> {
        let key = self.key()?;

        let channel = match factory.open(&key, self.access, false) {
            Ok(channel) => channel,
            Err(PakError::Io(err)) => {
                warn!("Cannot open medium {:?}: {}", key, err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        Container::load(key, self.access, channel)
    }

    /// Create on the local filesystem
    pub fn create(self) -> Result<Option<Container>> {
        self.create_with(&FsChannelFactory)
    }

    /// Load from the local filesystem
    pub fn load(self) -> Result<Option<Container>> {
        self.load_with(&FsChannelFactory)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
