//! Periodic expiry
//!
//! Every interval the cleaner runs one sync pass and then one expiry pass.
//! Syncing first refreshes the heartbeat of every lease still present in
//! the file, so a lease renewed since the last file event is never reaped.
//!
//! The timer is re-armed only after a pass returns; passes never overlap.
//!
//! ## Failures
//!
//! A failed expiry pass (the store could not be listed) is retried on the
//! next tick. Only `max_failures` failed passes in a row stop the loop with
//! [`Error::CleanupAborted`]; any successful pass resets the count.

use crate::backend::LeaseBackend;
use crate::error::{Error, Result};
use crate::watcher::LeaseSync;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run sync + expiry passes every `interval` until cancelled
///
/// # Returns
///
/// - `Ok(())`: `cancel` fired
/// - `Err(Error::CleanupAborted)`: `max_failures` consecutive passes failed
pub async fn run_cleaner(
    cancel: CancellationToken,
    backend: LeaseBackend,
    sync: LeaseSync,
    interval: Duration,
    max_failures: usize,
) -> Result<()> {
    let max_failures = max_failures.max(1);
    let mut failures = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cleaner stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }

        sync.sync(&cancel).await;
        if cancel.is_cancelled() {
            info!("cleaner stopped");
            return Ok(());
        }

        match backend.cleanup().await {
            Ok(report) => {
                if failures > 0 {
                    info!(failures, "cleanup recovered");
                }
                failures = 0;
                debug!(expired = report.expired, invalid = report.invalid, "cleanup pass done");
            }
            Err(e) => {
                failures += 1;
                if failures >= max_failures {
                    error!(error = %e, failures, "cleanup keeps failing, giving up");
                    return Err(Error::CleanupAborted { failures });
                }
                warn!(error = %e, failures, max_failures, "cleanup failed, retrying next tick");
            }
        }
    }
}
