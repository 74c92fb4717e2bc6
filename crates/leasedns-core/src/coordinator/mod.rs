//! Change coordinator
//!
//! Turns a bursty stream of change signals into a sequence of job runs.
//!
//! ## State
//!
//! ```text
//!            signal()                      run loop takes it
//!   Idle(0) ─────────▶ Pending(1) ──────────────────────────▶ Idle(0) + job
//!              ▲           │
//!              └───────────┘ signal() while pending: no-op
//! ```
//!
//! The queue depth never exceeds one. A burst of signals while a job is
//! running therefore causes at most one more run after it, and a signal
//! while idle always causes exactly one run.
//!
//! The queue lock is only held for bookkeeping, never across the job, so
//! [`Coordinator::signal`] never waits for a slow job.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Single-worker job scheduler with one pending slot
#[derive(Debug)]
pub struct Coordinator {
    /// Requested but not yet started runs, 0 or 1
    queue: Mutex<u8>,
    /// Wake-up for the run loop; keeps one permit if nobody is waiting
    wake: Notify,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator that stops when `cancel` fires
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            queue: Mutex::new(0),
            wake: Notify::new(),
            cancel,
        }
    }

    /// Request a job run
    ///
    /// Returns immediately. If a run is already pending this is a no-op.
    pub fn signal(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if *queue >= 1 {
            return;
        }

        *queue += 1;
        self.wake.notify_one();
        debug!(queue = *queue, "coordinator signalled");
    }

    /// Number of pending runs (0 or 1)
    pub fn pending(&self) -> u8 {
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `job` once per accepted signal until cancelled
    ///
    /// On cancellation the loop exits even if a run is pending; that run is
    /// dropped. A job already in progress is not interrupted by the loop
    /// itself; jobs that should stop early must observe the token.
    pub async fn run<F, Fut>(&self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("job coordinator stopped");
                    return;
                }
                _ = self.wake.notified() => {
                    while self.take_pending() {
                        job().await;
                    }
                }
            }
        }
    }

    fn take_pending(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if *queue == 0 {
            return false;
        }
        *queue -= 1;
        true
    }
}
