//! Watch coordination
//!
//! Wires a [`ChangeSource`] to a [`Coordinator`] whose job is one streaming
//! extraction pass over the lease file.
//!
//! ## Tasks
//!
//! ```text
//! ChangeSource ── ChangeEvent ──▶ listener ── signal() ──▶ Coordinator
//!                                                               │
//!                                                          job runner
//!                                                               │
//!                                                               ▼
//!                                   LeaseSync::sync ── put ──▶ LeaseBackend
//! ```
//!
//! Both tasks are registered with the shutdown barrier before they are
//! spawned. When either of them ends, it cancels the root token: a process
//! whose watcher died must not keep running with stale records. A change
//! stream that ends before the root token was cancelled is recorded, see
//! [`LeaseSync::watch_lost`].

use crate::backend::LeaseBackend;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::extractor::LeaseParser;
use crate::shutdown::TimeoutGroup;
use crate::traits::ChangeSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One-shot synchronisation of the lease file into the backend
///
/// Cloning is cheap; clones share the backend.
#[derive(Debug, Clone)]
pub struct LeaseSync {
    parser: LeaseParser,
    lease_file: Arc<PathBuf>,
    backend: LeaseBackend,
    watch_lost: Arc<AtomicBool>,
}

impl LeaseSync {
    /// Create a sync job for `lease_file`
    pub fn new(lease_file: impl Into<PathBuf>, backend: LeaseBackend) -> Self {
        Self {
            parser: LeaseParser::new(),
            lease_file: Arc::new(lease_file.into()),
            backend,
            watch_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Path of the lease file
    pub fn lease_file(&self) -> &Path {
        &self.lease_file
    }

    /// The backend leases are written to
    pub fn backend(&self) -> &LeaseBackend {
        &self.backend
    }

    /// Whether the change stream ended on its own
    ///
    /// Set when the watch driving this job stopped before the root token was
    /// cancelled (source failure, watched directory removed). A shutdown
    /// requested through the token leaves it unset.
    pub fn watch_lost(&self) -> bool {
        self.watch_lost.load(Ordering::SeqCst)
    }

    /// Put every lease currently in the file
    ///
    /// Puts run concurrently with the scan. Failures are logged per lease;
    /// an unreadable file ends the pass early. Returns once every put has
    /// finished.
    pub async fn sync(&self, cancel: &CancellationToken) {
        debug!(path = %self.lease_file.display(), "syncing lease file");

        let backend = self.backend.clone();
        self.parser
            .parse_streaming_with_handler(
                self.lease_file.as_path(),
                cancel.clone(),
                move |lease| {
                    let backend = backend.clone();
                    async move {
                        debug!(name = %lease.name(), address = %lease.address(), "put lease");
                        if let Err(e) = backend.put(&lease).await {
                            error!(lease = %lease, error = %e, "failed to put lease");
                        }
                    }
                },
            )
            .await;
    }
}

/// Start watching `lease_file` and syncing it on every change
///
/// Must be called from within a Tokio runtime.
///
/// # Parameters
///
/// - `cancel`: Root token; stops both tasks and is cancelled by either of
///   them when it ends
/// - `lease_file`: Lease file to watch and parse
/// - `backend`: Destination of the leases
/// - `source`: Change notification source
/// - `group`: Shutdown barrier both tasks register with
///
/// # Returns
///
/// - `Ok(LeaseSync)`: the watch is running; the returned job can be used
///   for extra passes (initial sync, pre-cleanup sync)
/// - `Err(Error::Watch)`: the watch could not be established
pub fn coordinate_watcher(
    cancel: &CancellationToken,
    lease_file: impl Into<PathBuf>,
    backend: LeaseBackend,
    source: &dyn ChangeSource,
    group: &TimeoutGroup,
) -> Result<LeaseSync> {
    let lease_file = lease_file.into();
    let mut events = source.watch(&lease_file, cancel.clone())?;
    let sync = LeaseSync::new(lease_file.clone(), backend);
    let coordinator = Arc::new(Coordinator::new(cancel.clone()));

    info!(
        path = %lease_file.display(),
        source = source.source_name(),
        "watching lease file"
    );

    let guard = group.enter();
    let runner = Arc::clone(&coordinator);
    let job = sync.clone();
    let root = cancel.clone();
    tokio::spawn(async move {
        let _guard = guard;
        runner
            .run(|| {
                let job = job.clone();
                let cancel = root.clone();
                async move { job.sync(&cancel).await }
            })
            .await;
        root.cancel();
    });

    let guard = group.enter();
    let root = cancel.clone();
    let watch_lost = Arc::clone(&sync.watch_lost);
    let source_name = source.source_name();
    tokio::spawn(async move {
        let _guard = guard;
        loop {
            tokio::select! {
                _ = root.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => {
                        debug!(path = %event.path.display(), kind = ?event.kind, "lease file changed");
                        coordinator.signal();
                    }
                    None => {
                        if !root.is_cancelled() {
                            warn!(source = source_name, "change stream ended");
                            watch_lost.store(true, Ordering::SeqCst);
                        }
                        break;
                    }
                },
            }
        }
        info!("file watcher stopped");
        root.cancel();
    });

    Ok(sync)
}
