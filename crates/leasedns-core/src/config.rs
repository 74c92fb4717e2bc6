//! Configuration types for the lease bridge
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Lease file settings
    pub lease: LeaseConfig,

    /// Store key prefixes
    pub key_prefix: PrefixConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Interval between expiry passes (in seconds)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Consecutive failed expiry passes tolerated before the cleaner gives up
    #[serde(default = "default_max_cleanup_failures")]
    pub max_cleanup_failures: usize,

    /// Upper bound on waiting for background tasks at shutdown (in seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl BridgeConfig {
    /// Create a configuration for `lease_file` with the given prefixes and defaults
    pub fn new(
        lease_file: impl Into<PathBuf>,
        zone_prefix: impl Into<String>,
        heartbeat_prefix: impl Into<String>,
    ) -> Self {
        Self {
            lease: LeaseConfig::new(lease_file),
            key_prefix: PrefixConfig {
                zone: zone_prefix.into(),
                heartbeat: heartbeat_prefix.into(),
            },
            store: StoreConfig::default(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_cleanup_failures: default_max_cleanup_failures(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.lease.validate()?;
        self.key_prefix.validate()?;
        self.store.validate()?;

        if self.cleanup_interval_secs == 0 {
            return Err(crate::Error::config("Cleanup interval must be > 0"));
        }
        if self.max_cleanup_failures == 0 {
            return Err(crate::Error::config("Max cleanup failures must be > 0"));
        }

        Ok(())
    }

    /// Interval between expiry passes
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Shutdown wait deadline
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Lease file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Path of the dhcpd lease file
    pub file: PathBuf,

    /// Age after which a lease without a fresh heartbeat is removed (in seconds)
    #[serde(default = "default_lease_timeout_secs")]
    pub timeout_secs: u64,
}

impl LeaseConfig {
    /// Create a lease configuration with the default timeout
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            timeout_secs: default_lease_timeout_secs(),
        }
    }

    /// Set the heartbeat timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Heartbeat timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.file.as_os_str().is_empty() {
            return Err(crate::Error::config("Lease file path cannot be empty"));
        }
        if self.file.file_name().is_none() {
            return Err(crate::Error::config(format!(
                "Lease file path must name a file: {}",
                self.file.display()
            )));
        }
        Ok(())
    }
}

/// Root prefixes of the two store namespaces
///
/// A record key and its heartbeat key share everything after the prefix,
/// so the prefixes must be distinct and neither may contain the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    /// Root of the DNS record namespace (e.g. `/skydns/lan/`)
    pub zone: String,

    /// Root of the heartbeat namespace (e.g. `/dhcpd/lan/`)
    pub heartbeat: String,
}

impl PrefixConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.zone.trim_end_matches('/').is_empty() {
            return Err(crate::Error::config("Zone prefix cannot be empty"));
        }
        if self.heartbeat.trim_end_matches('/').is_empty() {
            return Err(crate::Error::config("Heartbeat prefix cannot be empty"));
        }

        let zone = format!("{}/", self.zone.trim_end_matches('/'));
        let heartbeat = format!("{}/", self.heartbeat.trim_end_matches('/'));
        if zone.starts_with(&heartbeat) || heartbeat.starts_with(&zone) {
            return Err(crate::Error::config(format!(
                "Zone prefix '{}' and heartbeat prefix '{}' must not overlap",
                self.zone, self.heartbeat
            )));
        }

        Ok(())
    }
}

/// Record store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// etcd v3 cluster reached through its JSON gateway
    Etcd {
        /// Endpoint URLs, tried in order (e.g. `http://etcd:2379`)
        endpoints: Vec<String>,
        /// Optional user name for etcd authentication
        #[serde(default)]
        username: Option<String>,
        /// Optional password for etcd authentication
        #[serde(default)]
        password: Option<String>,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Etcd {
                endpoints,
                username,
                password,
            } => {
                if endpoints.is_empty() {
                    return Err(crate::Error::config("etcd store needs at least one endpoint"));
                }
                for endpoint in endpoints {
                    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                        return Err(crate::Error::config(format!(
                            "etcd endpoint must use HTTP or HTTPS scheme. Got: {}",
                            endpoint
                        )));
                    }
                }
                if username.is_some() != password.is_some() {
                    return Err(crate::Error::config(
                        "etcd username and password must be set together",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Etcd { .. } => "etcd",
        }
    }
}

fn default_lease_timeout_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_cleanup_failures() -> usize {
    3
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}
