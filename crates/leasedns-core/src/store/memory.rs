// # Memory KV Store
//
// In-memory implementation of KvStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for dry runs of the daemon against a real lease
// file without touching the production record store.
//
// ## Ordering
//
// `get_sorted_by_value` sorts by the raw value bytes and then by key,
// matching how etcd orders a `SortByValue` / `SortAscend` range request.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::traits::kv_store::{KeyValue, KvStore, KvStoreFactory};

/// In-memory store implementation
///
/// This implementation stores all entries in a BTreeMap protected by a RwLock.
/// It provides no persistence across restarts.
///
/// # Example
///
/// ```rust,no_run
/// use leasedns_core::store::MemoryKvStore;
/// use leasedns_core::traits::KvStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryKvStore::new();
///
///     store.put("/dhcpd/lan/host/0a000001", "1700000000").await?;
///
///     let entries = store.get_sorted_by_value("/dhcpd/").await?;
///     assert_eq!(entries.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryKvStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Read a single key
    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    /// All keys under `prefix`, in key order
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_sorted_by_value(&self, prefix: &str) -> Result<Vec<KeyValue>, Error> {
        let guard = self.inner.read().await;
        let mut entries: Vec<KeyValue> = guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue::new(key.as_str(), value.as_str()))
            .collect();

        // BTreeMap iteration already yields keys in order, so a stable sort
        // by value keeps ties ordered by key.
        entries.sort_by(|a, b| a.value.as_bytes().cmp(b.value.as_bytes()));
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<u64, Error> {
        let mut guard = self.inner.write().await;
        Ok(u64::from(guard.remove(key).is_some()))
    }

    async fn close(&self) -> Result<(), Error> {
        // Nothing to release
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for creating memory stores
pub struct MemoryKvStoreFactory;

impl KvStoreFactory for MemoryKvStoreFactory {
    fn create(&self, config: &StoreConfig) -> Result<Box<dyn KvStore>, Error> {
        match config {
            StoreConfig::Memory => Ok(Box::new(MemoryKvStore::new())),
            _ => Err(Error::config("Invalid config for memory store")),
        }
    }
}
