// # Change Source Trait
//
// Defines the interface for observing modifications of the lease file.
//
// ## Implementations
//
// - inotify (Linux): `leasedns-watch-inotify` crate
//
// ## Usage
//
// ```rust,ignore
// use leasedns_core::ChangeSource;
// use tokio_stream::StreamExt;
//
// let mut events = source.watch(Path::new("/var/lib/dhcp/dhcpd.leases"), cancel.clone())?;
// while let Some(event) = events.next().await {
//     coordinator.signal();
// }
// ```

use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// What happened to the watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Contents were written or truncated
    Modified,
    /// The file appeared (created or moved into place)
    Created,
    /// The file was deleted or moved away
    Removed,
    /// The file was renamed over
    Renamed,
    /// Any other notification
    Other,
}

/// A file-system notification for the watched path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path the event refers to
    pub path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Create a new change event
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Boxed stream of change events
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send + 'static>>;

/// Trait for change source implementations
///
/// One logical rewrite of the lease file (truncate + write, or write to a
/// temporary file + rename) may surface as several events. Consumers are
/// expected to coalesce them.
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Perform platform-specific I/O (inotify, kqueue)
/// - ⚠️ Spawn one task per watch, which MUST exit when `cancel` fires
///
/// ## Forbidden Capabilities
/// - ❌ Read or parse the lease file (owned by `LeaseParser`)
/// - ❌ Access the store
/// - ❌ Poll with `sleep()` loops
pub trait ChangeSource: Send + Sync {
    /// Start watching `path`
    ///
    /// The returned stream ends after `cancel` is cancelled, releasing the
    /// underlying watch.
    ///
    /// # Returns
    ///
    /// - `Ok(stream)`: the watch is established
    /// - `Err(Error::Watch)`: the watch could not be set up
    fn watch(&self, path: &Path, cancel: CancellationToken) -> Result<ChangeStream, crate::Error>;

    /// Source type name, used in logs
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing change sources by name
pub trait ChangeSourceFactory: Send + Sync {
    /// Create a ChangeSource instance
    fn create(&self) -> Result<Box<dyn ChangeSource>, crate::Error>;
}
