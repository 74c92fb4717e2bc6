//! Lease backend
//!
//! Maps leases onto the two store namespaces and reclaims expired ones.
//!
//! ## Namespaces
//!
//! ```text
//! <zone>/<labels reversed>/<lease id>       {"host":..,"group":..,"ttl":60}
//! <heartbeat>/<labels reversed>/<lease id>  "<unix seconds of last sync>"
//! ```
//!
//! ## Expiry
//!
//! [`LeaseBackend::cleanup`] lists the heartbeat namespace sorted ascending
//! by value and walks it oldest first:
//!
//! 1. Value not a timestamp: delete the heartbeat key, continue.
//! 2. Heartbeat older than the timeout: delete heartbeat and record, continue.
//! 3. Heartbeat within the timeout: stop. Every later entry is at least as
//!    fresh, so nothing else can be expired.
//!
//! Deletes are best effort. A delete that removes an unexpected number of
//! keys, or fails outright, is logged and the scan moves on; only a failed
//! listing is returned as an error.

pub mod keys;

use crate::error::{Error, Result};
use crate::lease::Lease;
use crate::traits::{KeyValue, KvStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use keys::{HostEntry, RECORD_TTL, build_key};

/// Outcome of one expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Heartbeat entries examined (including the one that stopped the scan)
    pub scanned: usize,
    /// Leases removed because their heartbeat was too old
    pub expired: usize,
    /// Heartbeat entries removed because their value was not a timestamp
    pub invalid: usize,
}

/// What to do after examining one heartbeat entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Invalid,
    Expired,
    Fresh,
}

/// Writes leases to a [`KvStore`] and expires stale ones
///
/// Cloning is cheap; clones share the store.
#[derive(Clone)]
pub struct LeaseBackend {
    store: Arc<dyn KvStore>,
    zone_root: String,
    heartbeat_root: String,
    lease_timeout: chrono::Duration,
}

impl std::fmt::Debug for LeaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseBackend")
            .field("store", &self.store.store_name())
            .field("zone_root", &self.zone_root)
            .field("heartbeat_root", &self.heartbeat_root)
            .field("lease_timeout", &self.lease_timeout)
            .finish()
    }
}

impl LeaseBackend {
    /// Create a backend
    ///
    /// # Parameters
    ///
    /// - `store`: Record store
    /// - `zone_prefix`: Root of the record namespace
    /// - `heartbeat_prefix`: Root of the heartbeat namespace
    /// - `lease_timeout`: Maximum heartbeat age before a lease is removed
    pub fn new(
        store: Arc<dyn KvStore>,
        zone_prefix: &str,
        heartbeat_prefix: &str,
        lease_timeout: Duration,
    ) -> Result<Self> {
        let lease_timeout = chrono::Duration::from_std(lease_timeout)
            .map_err(|e| Error::config(format!("Lease timeout out of range: {}", e)))?;

        Ok(Self {
            store,
            zone_root: zone_prefix.trim_end_matches('/').to_string(),
            heartbeat_root: heartbeat_prefix.trim_end_matches('/').to_string(),
            lease_timeout,
        })
    }

    /// Create a backend from the bridge configuration
    pub fn from_config(store: Arc<dyn KvStore>, config: &crate::config::BridgeConfig) -> Result<Self> {
        Self::new(
            store,
            &config.key_prefix.zone,
            &config.key_prefix.heartbeat,
            config.lease.timeout(),
        )
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Key of `lease` in the record namespace
    pub fn record_key(&self, lease: &Lease) -> String {
        build_key(lease, &self.zone_root)
    }

    /// Key of `lease` in the heartbeat namespace
    pub fn heartbeat_key(&self, lease: &Lease) -> String {
        build_key(lease, &self.heartbeat_root)
    }

    /// Publish `lease` and refresh its heartbeat
    ///
    /// Both writes are idempotent, so concurrent or repeated puts of the
    /// same lease converge to the same state.
    pub async fn put(&self, lease: &Lease) -> Result<()> {
        self.put_at(lease, Utc::now()).await
    }

    /// [`put`](Self::put) with an explicit heartbeat time
    pub async fn put_at(&self, lease: &Lease, now: DateTime<Utc>) -> Result<()> {
        let payload = serde_json::to_string(&HostEntry::for_lease(lease))?;
        self.store.put(&self.record_key(lease), &payload).await?;

        self.store
            .put(&self.heartbeat_key(lease), &now.timestamp().to_string())
            .await?;

        Ok(())
    }

    /// Remove every lease whose heartbeat is older than the timeout
    ///
    /// # Returns
    ///
    /// - `Ok(CleanupReport)`: the pass completed (individual deletes may
    ///   still have failed, see module docs)
    /// - `Err(Error)`: the heartbeat listing could not be fetched
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.cleanup_at(Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) against an explicit clock
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let listing_prefix = format!("{}/", self.heartbeat_root);
        let entries = self.store.get_sorted_by_value(&listing_prefix).await?;
        debug!(count = entries.len(), prefix = %listing_prefix, "received heartbeat keys");

        let mut report = CleanupReport::default();
        for entry in &entries {
            report.scanned += 1;
            match self.handle_heartbeat(entry, now).await {
                Verdict::Invalid => report.invalid += 1,
                Verdict::Expired => report.expired += 1,
                Verdict::Fresh => break,
            }
        }

        debug!(
            scanned = report.scanned,
            expired = report.expired,
            invalid = report.invalid,
            "cleanup pass finished"
        );
        Ok(report)
    }

    /// Close the underlying store
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    async fn handle_heartbeat(&self, entry: &KeyValue, now: DateTime<Utc>) -> Verdict {
        let created = entry
            .value
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let Some(created) = created else {
            warn!(key = %entry.key, value = %entry.value, "deleting key with invalid heartbeat timestamp");
            self.remove(&entry.key).await;
            return Verdict::Invalid;
        };

        if now.signed_duration_since(created) <= self.lease_timeout {
            // Reached the first live lease
            return Verdict::Fresh;
        }

        info!(key = %entry.key, "remove expired lease");
        self.remove(&entry.key).await;

        match entry.key.strip_prefix(&self.heartbeat_root) {
            Some(suffix) => {
                let record_key = format!("{}{}", self.zone_root, suffix);
                self.remove(&record_key).await;
            }
            None => {
                warn!(key = %entry.key, "heartbeat key outside heartbeat namespace, record left in place");
            }
        }

        Verdict::Expired
    }

    async fn remove(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(1) => {}
            Ok(deleted) => {
                warn!(key, expected = 1, actual = deleted, "deletion removed wrong number of keys");
            }
            Err(e) => {
                warn!(key, error = %e, "failed to delete key");
            }
        }
    }
}
