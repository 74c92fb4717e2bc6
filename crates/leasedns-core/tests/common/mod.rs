//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that verify behavioural
//! constraints without a real etcd cluster or inotify.

#![allow(dead_code)]

use leasedns_core::error::{Error, Result};
use leasedns_core::traits::{ChangeEvent, ChangeKind, ChangeSource, ChangeStream, KeyValue, KvStore};
use leasedns_core::{Lease, LeaseBackend, LeaseParser, MemoryKvStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const ZONE: &str = "/skydns/lan/";
pub const HEARTBEAT: &str = "/dhcpd/lan/";

/// A change source whose events are emitted by the test
pub struct ControlledChangeSource {
    /// Receiver handed out by the first watch() call
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
    /// Call counter for watch()
    watch_call_count: AtomicUsize,
}

impl ControlledChangeSource {
    /// Create a new controlled source and the sender that drives it
    pub fn new() -> (Self, mpsc::UnboundedSender<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx: std::sync::Mutex::new(Some(rx)),
            watch_call_count: AtomicUsize::new(0),
        };
        (source, tx)
    }

    /// Get the number of times watch() was called
    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

impl ChangeSource for ControlledChangeSource {
    fn watch(&self, _path: &Path, _cancel: CancellationToken) -> Result<ChangeStream> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);

        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::watch("watch() can only be called once"))?;

        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }
}

/// A change source whose watch can never be established
pub struct BrokenChangeSource;

impl ChangeSource for BrokenChangeSource {
    fn watch(&self, path: &Path, _cancel: CancellationToken) -> Result<ChangeStream> {
        Err(Error::watch(format!("cannot watch {}", path.display())))
    }

    fn source_name(&self) -> &'static str {
        "broken"
    }
}

/// Convenience: a modification event for `path`
pub fn modified(path: &Path) -> ChangeEvent {
    ChangeEvent::new(path, ChangeKind::Modified)
}

/// A memory store that counts calls and can slow down puts
pub struct CountingKvStore {
    pub inner: MemoryKvStore,
    put_delay: Duration,
    put_count: AtomicUsize,
    delete_count: AtomicUsize,
    deleted: std::sync::Mutex<Vec<String>>,
}

impl CountingKvStore {
    pub fn new() -> Self {
        Self::with_put_delay(Duration::ZERO)
    }

    pub fn with_put_delay(put_delay: Duration) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            put_delay,
            put_count: AtomicUsize::new(0),
            delete_count: AtomicUsize::new(0),
            deleted: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get the number of times put() was called
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Get the number of times delete() was called
    pub fn delete_count(&self) -> usize {
        self.delete_count.load(Ordering::SeqCst)
    }

    /// Keys passed to delete(), in call order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl KvStore for CountingKvStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        self.inner.put(key, value).await
    }

    async fn get_sorted_by_value(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.inner.get_sorted_by_value(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "counting"
    }
}

/// Build a backend over `store` with the test prefixes
pub fn backend(store: Arc<dyn KvStore>, timeout: Duration) -> LeaseBackend {
    LeaseBackend::new(store, ZONE, HEARTBEAT, timeout).expect("valid backend")
}

/// One lease block as dhcpd writes it
pub fn lease_block(name: &str, address: &str) -> String {
    format!(
        "lease {address} {{\n  \
           starts 3 2024/05/01 10:00:00;\n  \
           ends 3 2024/05/01 22:00:00;\n  \
           binding state active;\n  \
           hardware ethernet 52:54:00:12:34:56;\n  \
           uid \"\\001RT\\000\\0224V\";\n  \
           client-hostname \"{name}\";\n\
         }}\n"
    )
}

/// Write a lease file containing one block per `(name, address)`
pub fn lease_file(leases: &[(&str, &str)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "# The format of this file is documented in the dhcpd.leases(5) manual page.").unwrap();
    for (name, address) in leases {
        file.write_all(lease_block(name, address).as_bytes()).unwrap();
    }
    file.flush().unwrap();
    file
}

/// A lease obtained through the parser
pub fn lease(name: &str, address: &str) -> Lease {
    LeaseParser::new()
        .parse_data(lease_block(name, address).as_bytes())
        .pop()
        .expect("lease block parses")
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

/// Path of a file that does not exist
pub fn missing_file() -> PathBuf {
    PathBuf::from("/nonexistent/leasedns/dhcpd.leases")
}
