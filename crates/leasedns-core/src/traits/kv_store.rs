// # Key-Value Store Trait
//
// Defines the interface of the record store the bridge writes to.
//
// ## Purpose
//
// The store holds two parallel namespaces per lease:
// - the record namespace, read by the downstream DNS resolver
// - the heartbeat namespace, holding the last sync time of each lease
//
// The expiry scan relies on the store returning a prefix listing sorted by
// value; stores that cannot do this are not supported.
//
// ## Implementations
//
// - In-memory: `MemoryKvStore` (this crate)
// - etcd v3: `leasedns-store-etcd` crate

use async_trait::async_trait;

/// A single entry returned by a prefix listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key
    pub key: String,
    /// Stored value
    pub value: String,
}

impl KeyValue {
    /// Create a new entry
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Trait for record store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
/// Single-key `put` and `delete` must be atomic; no cross-key transactions
/// are required.
///
/// # Trust Level: Untrusted (Remote Store)
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O to the configured endpoints only
/// - ✅ Keep a connection or authentication token between calls
///
/// ## Forbidden Capabilities
/// - ❌ Spawn background tasks (violates shutdown determinism)
/// - ❌ Retry on its own (the cleaner loop decides when to try again)
/// - ❌ Interpret keys or values (owned by `LeaseBackend`)
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Create or overwrite `key`
    async fn put(&self, key: &str, value: &str) -> Result<(), crate::Error>;

    /// List all entries under `prefix`, ascending by value
    ///
    /// Values are compared as raw bytes. Entries with equal values may come
    /// in any order.
    async fn get_sorted_by_value(&self, prefix: &str) -> Result<Vec<KeyValue>, crate::Error>;

    /// Delete `key`
    ///
    /// # Returns
    ///
    /// - `Ok(n)`: number of entries removed (0 if the key did not exist)
    /// - `Err(Error)`: store unreachable or request rejected
    async fn delete(&self, key: &str) -> Result<u64, crate::Error>;

    /// Release connections held by the store
    async fn close(&self) -> Result<(), crate::Error>;

    /// Store type name, used in logs
    fn store_name(&self) -> &'static str;
}

/// Helper trait for constructing stores from configuration
pub trait KvStoreFactory: Send + Sync {
    /// Create a KvStore instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Store section of the bridge configuration
    ///
    /// # Returns
    ///
    /// A boxed KvStore trait object
    fn create(&self, config: &crate::config::StoreConfig) -> Result<Box<dyn KvStore>, crate::Error>;
}
