//! Shutdown barrier
//!
//! A counted wait group with a bounded wait. Background loops register
//! before they are spawned and report completion when they observe
//! cancellation; the owner then waits for the count to reach zero, but
//! never longer than a deadline.
//!
//! ```rust,ignore
//! let group = TimeoutGroup::new();
//! let guard = group.enter();
//! tokio::spawn(async move {
//!     let _guard = guard;
//!     cancel.cancelled().await;
//! });
//!
//! group.wait_with_timeout(Duration::from_secs(10)).await?;
//! ```

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Counted barrier with a deadline-bounded wait
///
/// Cloning is cheap; clones share the same counter.
#[derive(Debug, Clone)]
pub struct TimeoutGroup {
    count: Arc<watch::Sender<usize>>,
}

impl TimeoutGroup {
    /// Create an empty group
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Register `n` more participants
    pub fn add(&self, n: usize) {
        self.count.send_modify(|count| *count += n);
    }

    /// Mark one participant as finished
    ///
    /// Calling this more often than participants were added is a bug in the
    /// caller; the counter stays at zero and a warning is logged.
    pub fn done(&self) {
        self.count.send_modify(|count| {
            if *count == 0 {
                warn!("shutdown barrier released more often than entered");
            } else {
                *count -= 1;
            }
        });
    }

    /// Register one participant and return a guard that finishes it on drop
    pub fn enter(&self) -> GroupGuard {
        self.add(1);
        GroupGuard {
            group: self.clone(),
        }
    }

    /// Number of participants that have not finished yet
    pub fn active(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until every participant has finished
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Wait until every participant has finished or `timeout` elapses
    ///
    /// # Returns
    ///
    /// - `Ok(())`: the count reached zero in time
    /// - `Err(Error::ShutdownTimeout)`: the deadline passed first
    pub async fn wait_with_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::ShutdownTimeout(timeout))
    }
}

impl Default for TimeoutGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Finishes one participant of a [`TimeoutGroup`] when dropped
#[derive(Debug)]
pub struct GroupGuard {
    group: TimeoutGroup,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}
