//! Plugin-based store and change source registry
//!
//! The registry allows record stores and change sources to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains in the daemon.
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In leasedns-store-etcd
//! pub fn register(registry: &Registry) {
//!     registry.register_store("etcd", Box::new(EtcdKvStoreFactory));
//! }
//! ```
//!
//! The in-memory store is always registered under `"memory"`.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::MemoryKvStoreFactory;
use crate::traits::{ChangeSource, ChangeSourceFactory, KvStore, KvStoreFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Registry for plugin-based store and change source creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
pub struct Registry {
    /// Registered store factories
    stores: RwLock<HashMap<String, Box<dyn KvStoreFactory>>>,

    /// Registered change source factories
    change_sources: RwLock<HashMap<String, Box<dyn ChangeSourceFactory>>>,
}

impl Registry {
    /// Create a registry with the built-in memory store
    pub fn new() -> Self {
        let registry = Self {
            stores: RwLock::new(HashMap::new()),
            change_sources: RwLock::new(HashMap::new()),
        };
        registry.register_store("memory", Box::new(MemoryKvStoreFactory));
        registry
    }

    /// Register a store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name, matching [`StoreConfig::type_name`]
    /// - `factory`: Factory object for creating store instances
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn KvStoreFactory>) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), factory);
    }

    /// Register a change source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Change source name (e.g., "inotify")
    /// - `factory`: Factory object for creating change source instances
    pub fn register_change_source(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ChangeSourceFactory>,
    ) {
        let mut sources = self
            .change_sources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sources.insert(name.into(), factory);
    }

    /// Create a store from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn KvStore>)`: Created store instance
    /// - `Err(Error)`: If the store type is not registered or creation fails
    pub fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn KvStore>> {
        let store_type = config.type_name();
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);

        let factory = stores
            .get(store_type)
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(config)
    }

    /// Create a change source by name
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ChangeSource>)`: Created change source
    /// - `Err(Error)`: If the name is not registered or creation fails
    pub fn create_change_source(&self, name: &str) -> Result<Box<dyn ChangeSource>> {
        let sources = self
            .change_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = sources
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown change source: {}", name)))?;

        factory.create()
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.keys().cloned().collect()
    }

    /// List all registered change sources
    pub fn list_change_sources(&self) -> Vec<String> {
        let sources = self
            .change_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        sources.keys().cloned().collect()
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.contains_key(name)
    }

    /// Check if a change source is registered
    pub fn has_change_source(&self, name: &str) -> bool {
        let sources = self
            .change_sources
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        sources.contains_key(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
