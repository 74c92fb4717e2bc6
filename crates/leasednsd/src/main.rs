// # leasednsd - Lease to DNS Daemon
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add parsing, key layout or expiry logic here
// - All bridge logic MUST be in leasedns-core
// - Configuration is via environment variables ONLY
//
// The leasednsd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Registering stores and change sources
// 4. Starting the watcher and the cleaner, and stopping them on SIGTERM/SIGINT
//
// ## Configuration
//
// ### Lease File
// - `LEASEDNS_LEASE_FILE`: Path of the dhcpd lease file (required)
// - `LEASEDNS_LEASE_TIMEOUT_SECS`: Heartbeat age after which a lease is removed (default 60)
//
// ### Key Layout
// - `LEASEDNS_ZONE_PREFIX`: Root of the DNS record namespace (required, e.g. /skydns/lan/)
// - `LEASEDNS_HEARTBEAT_PREFIX`: Root of the heartbeat namespace (required, e.g. /dhcpd/)
//
// ### Store
// - `LEASEDNS_STORE_TYPE`: Store type (etcd, memory; default etcd)
// - `LEASEDNS_ETCD_ENDPOINTS`: Comma-separated gateway URLs (for etcd)
// - `LEASEDNS_ETCD_USERNAME` / `LEASEDNS_ETCD_PASSWORD`: Optional credentials
//
// ### Lifecycle
// - `LEASEDNS_CLEANUP_INTERVAL_SECS`: Seconds between expiry passes (default 60)
// - `LEASEDNS_MAX_CLEANUP_FAILURES`: Consecutive failed passes before giving up (default 3)
// - `LEASEDNS_SHUTDOWN_TIMEOUT_SECS`: Upper bound on shutdown (default 10)
// - `LEASEDNS_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export LEASEDNS_LEASE_FILE=/var/lib/dhcp/dhcpd.leases
// export LEASEDNS_ZONE_PREFIX=/skydns/lan/
// export LEASEDNS_HEARTBEAT_PREFIX=/dhcpd/
// export LEASEDNS_ETCD_ENDPOINTS=http://127.0.0.1:2379
//
// leasednsd
// ```

use anyhow::{Context, Result};
use leasedns_core::traits::KvStore;
use leasedns_core::{
    BridgeConfig, LeaseBackend, LeaseSync, Registry, StoreConfig, TimeoutGroup,
    coordinate_watcher, run_cleaner,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Change source used to watch the lease file
const CHANGE_SOURCE: &str = "inotify";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum LeaseDnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (cleaner gave up, watcher died, shutdown timed out)
    RuntimeError = 2,
}

impl From<LeaseDnsExitCode> for ExitCode {
    fn from(code: LeaseDnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    bridge: BridgeConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            var(name)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} is required", name))
        };

        let mut bridge = BridgeConfig::new(
            required("LEASEDNS_LEASE_FILE")?,
            required("LEASEDNS_ZONE_PREFIX")?,
            required("LEASEDNS_HEARTBEAT_PREFIX")?,
        );

        if let Some(secs) = number(&var, "LEASEDNS_LEASE_TIMEOUT_SECS")? {
            bridge.lease.timeout_secs = secs;
        }
        if let Some(secs) = number(&var, "LEASEDNS_CLEANUP_INTERVAL_SECS")? {
            bridge.cleanup_interval_secs = secs;
        }
        if let Some(failures) = number(&var, "LEASEDNS_MAX_CLEANUP_FAILURES")? {
            bridge.max_cleanup_failures = failures;
        }
        if let Some(secs) = number(&var, "LEASEDNS_SHUTDOWN_TIMEOUT_SECS")? {
            bridge.shutdown_timeout_secs = secs;
        }

        let store_type = var("LEASEDNS_STORE_TYPE").unwrap_or_else(|| "etcd".to_string());
        bridge.store = match store_type.as_str() {
            "memory" => StoreConfig::Memory,
            "etcd" => StoreConfig::Etcd {
                endpoints: var("LEASEDNS_ETCD_ENDPOINTS")
                    .unwrap_or_else(|| "http://127.0.0.1:2379".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                username: var("LEASEDNS_ETCD_USERNAME").filter(|s| !s.is_empty()),
                password: var("LEASEDNS_ETCD_PASSWORD").filter(|s| !s.is_empty()),
            },
            other => anyhow::bail!(
                "LEASEDNS_STORE_TYPE '{}' is not supported. \
                Supported types: etcd, memory",
                other
            ),
        };

        Ok(Self {
            bridge,
            log_level: var("LEASEDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.bridge.validate()?;

        if self.bridge.store.type_name() == "memory" {
            eprintln!(
                "WARNING: LEASEDNS_STORE_TYPE=memory keeps records in this process only. \
                Nothing will be visible to the DNS server."
            );
        }

        // Validate log level
        self.level()?;

        Ok(())
    }

    fn level(&self) -> Result<Level> {
        Ok(match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "LEASEDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        })
    }
}

/// Parse an optional numeric variable
fn number<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|v| {
            v.trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer. Got: {}", name, v))
        })
        .transpose()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return LeaseDnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return LeaseDnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return LeaseDnsExitCode::ConfigError.into();
    }

    info!("Starting leasednsd daemon");
    info!(
        lease_file = %config.bridge.lease.file.display(),
        store = config.bridge.store.type_name(),
        "Configuration loaded"
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return LeaseDnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let daemon = match Daemon::start(config.bridge).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return LeaseDnsExitCode::ConfigError;
            }
        };

        if let Err(e) = daemon.run().await {
            error!("Daemon error: {:#}", e);
            LeaseDnsExitCode::RuntimeError
        } else {
            LeaseDnsExitCode::CleanShutdown
        }
    });

    result.into()
}

/// A started daemon: watcher and cleaner are running
struct Daemon {
    config: BridgeConfig,
    backend: LeaseBackend,
    sync: LeaseSync,
    cleaner: JoinHandle<leasedns_core::Result<()>>,
    cancel: CancellationToken,
    group: TimeoutGroup,
}

impl Daemon {
    /// Build the components and start the background tasks
    async fn start(config: BridgeConfig) -> Result<Self> {
        // Create registry with the built-in memory store
        let registry = Registry::new();

        #[cfg(feature = "etcd")]
        {
            info!("Registering etcd store");
            leasedns_store_etcd::register(&registry);
        }

        #[cfg(feature = "inotify")]
        {
            info!("Registering inotify change source");
            leasedns_watch_inotify::register(&registry);
        }

        let store: Arc<dyn KvStore> = Arc::from(
            registry
                .create_store(&config.store)
                .context("Failed to create record store")?,
        );
        let source = registry
            .create_change_source(CHANGE_SOURCE)
            .context("Failed to create change source")?;
        let backend = LeaseBackend::from_config(store, &config)?;

        let cancel = CancellationToken::new();
        let group = TimeoutGroup::new();

        spawn_signal_handler(cancel.clone())?;

        let sync = coordinate_watcher(
            &cancel,
            &config.lease.file,
            backend.clone(),
            source.as_ref(),
            &group,
        )
        .context("Failed to watch lease file")?;

        let guard = group.enter();
        let cleaner = tokio::spawn({
            let cancel = cancel.clone();
            let backend = backend.clone();
            let sync = sync.clone();
            let interval = config.cleanup_interval();
            let max_failures = config.max_cleanup_failures;
            async move {
                let _guard = guard;
                let result = run_cleaner(cancel.clone(), backend, sync, interval, max_failures).await;
                if result.is_err() {
                    // Expiry is dead; stop rather than serve records forever
                    cancel.cancel();
                }
                result
            }
        });

        Ok(Self {
            config,
            backend,
            sync,
            cleaner,
            cancel,
            group,
        })
    }

    /// Run until shutdown, then wait for the background tasks
    async fn run(self) -> Result<()> {
        info!("Running initial sync");
        self.sync.sync(&self.cancel).await;
        info!("Daemon initialized successfully");

        self.cancel.cancelled().await;
        info!("Shutting down daemon");

        let waited = self.group.wait_with_timeout(self.config.shutdown_timeout()).await;

        if let Err(e) = self.backend.close().await {
            warn!("Failed to close record store: {}", e);
        }

        if let Err(e) = waited {
            warn!("Background tasks did not stop in time");
            return Err(e.into());
        }

        if self.sync.watch_lost() {
            error!(path = %self.sync.lease_file().display(), "Lease file watch was lost");
            anyhow::bail!(
                "Watch on {} ended unexpectedly",
                self.sync.lease_file().display()
            );
        }

        // The cleaner has released its guard, so the task is done
        match self.cleaner.await {
            Ok(result) => result.context("Cleaner stopped")?,
            Err(e) => anyhow::bail!("Cleaner task failed: {}", e),
        }

        Ok(())
    }
}

/// Cancel `cancel` on the first shutdown signal
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let (mut sigterm, mut sigint) = (
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?,
        signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?,
    );

    tokio::spawn(async move {
        #[cfg(unix)]
        let received = async {
            tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            }
        };

        #[cfg(not(unix))]
        let received = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    error!("Failed to wait for CTRL-C: {}", e);
                    std::future::pending().await
                }
            }
        };

        tokio::select! {
            signal = received => {
                info!("Received shutdown signal: {}", signal);
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });

    Ok(())
}
