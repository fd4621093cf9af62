//! Registry of open containers
//!
//! Maps normalized medium paths to open containers. The registry only does
//! bookkeeping; every container operation goes through the handle.

use crate::config::{ContainerBuilder, ContainerOptions, RegistryConfig};
use crate::container::Container;
use crate::error::{PakError, Result};
use crate::io::{Access, ChannelFactory, FsChannelFactory};
use crate::validation::normalize_container_key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared handle to an open container
///
/// The mutex serializes operations on one container; distinct containers
/// can be driven from different threads.
pub type ContainerHandle = Arc<Mutex<Container>>;

pub struct ContainerRegistry {
    factory: Arc<dyn ChannelFactory>,
    config: RegistryConfig,
    containers: HashMap<PathBuf, ContainerHandle>,
}

impl ContainerRegistry {
    /// Registry over media produced by `factory`, with default settings
    pub fn new<F: ChannelFactory + 'static>(factory: F) -> Self {
        Self::with_config(factory, RegistryConfig::default())
    }

    pub fn with_config<F: ChannelFactory + 'static>(factory: F, config: RegistryConfig) -> Self {
        ContainerRegistry {
            factory: Arc::new(factory),
            config,
            containers: HashMap::new(),
        }
    }

    /// Registry over the local filesystem
    pub fn filesystem(config: RegistryConfig) -> Self {
        Self::with_config(FsChannelFactory, config)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Key for `path`, failing if a container is already open there
    fn vacant_key(&self, path: &Path) -> Result<PathBuf> {
        let key = normalize_container_key(path)?;
        if self.containers.contains_key(&key) {
            return Err(PakError::AlreadyOpen(key.display().to_string()));
        }
        Ok(key)
    }

    fn register(&mut self, key: PathBuf, container: Option<Container>) -> Option<ContainerHandle> {
        let container = container?;
        let handle = Arc::new(Mutex::new(container));
        self.containers.insert(key, Arc::clone(&handle));
        Some(handle)
    }

    /// Create a container at `path` with the configured default capacities
    pub fn create<P: AsRef<Path>>(
        &mut self,
        path: P,
        access: Access,
    ) -> Result<Option<ContainerHandle>> {
        let options = self.config.defaults;
        self.create_with_options(path, access, options)
    }

    /// Create a container at `path`
    ///
    /// Returns `Ok(None)` if the medium cannot be created; fails with
    /// `AlreadyOpen` if a container is registered under the same path.
    pub fn create_with_options<P: AsRef<Path>>(
        &mut self,
        path: P,
        access: Access,
        options: ContainerOptions,
    ) -> Result<Option<ContainerHandle>> {
        let key = self.vacant_key(path.as_ref())?;

        let container = ContainerBuilder::new()
            .path(key.clone())
            .access(access)
            .options(options)
            .create_with(self.factory.as_ref())?;

        if container.is_some() {
            info!("Registered new container {:?}", key);
        }
        Ok(self.register(key, container))
    }

    /// Load the container at `path`
    ///
    /// Returns `Ok(None)` if the medium is missing or corrupt.
    pub fn load<P: AsRef<Path>>(
        &mut self,
        path: P,
        access: Access,
    ) -> Result<Option<ContainerHandle>> {
        let key = self.vacant_key(path.as_ref())?;

        let container = ContainerBuilder::new()
            .path(key.clone())
            .access(access)
            .load_with(self.factory.as_ref())?;

        if container.is_some() {
            info!("Registered loaded container {:?}", key);
        }
        Ok(self.register(key, container))
    }

    /// Handle to the container open at `path`
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<ContainerHandle> {
        let key = normalize_container_key(path.as_ref()).ok()?;
        self.containers.get(&key).cloned()
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.get(path).is_some()
    }

    /// Number of open containers
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Open container paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.containers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Close the container at `path` and forget it
    ///
    /// The medium is deleted when `delete_medium` is set or the registry is
    /// configured to remove media on destroy. Outstanding handles see a
    /// closed container afterwards.
    pub fn destroy<P: AsRef<Path>>(&mut self, path: P, delete_medium: bool) -> Result<()> {
        let key = normalize_container_key(path.as_ref())?;
        let handle = self
            .containers
            .remove(&key)
            .ok_or_else(|| PakError::NotOpen(key.display().to_string()))?;

        handle.lock().shutdown()?;

        if delete_medium || self.config.remove_medium_on_destroy {
            self.factory.remove(&key)?;
            info!("Destroyed container {:?} and removed its medium", key);
        } else {
            info!("Destroyed container {:?}", key);
        }
        Ok(())
    }

    /// Close every open container
    ///
    /// All containers are closed even if some fail; the first error is returned.
    pub fn shutdown_all(&mut self) -> Result<()> {
        let mut first_error = None;

        for (key, handle) in self.containers.drain() {
            if let Err(err) = handle.lock().shutdown() {
                warn!("Failed to close container {:?}: {}", key, err);
                first_error.get_or_insert(err);
            }
        }

        info!("Closed all containers");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ContainerRegistry {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_all() {
            warn!("Failed to close containers on drop: {}", err);
        }
    }
}
