// # inotify Change Source
//
// This crate provides an inotify-based change source for Linux systems.
//
// ## Watch Strategy
//
// dhcpd rewrites its lease file in two ways: appending to the live file,
// and periodically writing `dhcpd.leases~` and renaming it over the live
// file. A watch on the file itself would be lost on the first rename, so
// the *parent directory* is watched and events are filtered by file name.
//
// | inotify flag                   | ChangeKind |
// |--------------------------------|------------|
// | `IN_MODIFY`, `IN_CLOSE_WRITE`  | Modified   |
// | `IN_CREATE`                    | Created    |
// | `IN_MOVED_TO`                  | Renamed    |
// | `IN_DELETE`, `IN_MOVED_FROM`   | Removed    |
// | `IN_Q_OVERFLOW`                | Other      |
//
// A queue overflow is reported for the watched path regardless of name,
// since events for it may have been dropped.
//
// ## Platform Support
//
// The watch is only available on Linux. On other platforms the factory
// returns an error.

use leasedns_core::traits::{ChangeSource, ChangeSourceFactory, ChangeStream};
use leasedns_core::{Error, Registry, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[cfg(target_os = "linux")]
use leasedns_core::traits::{ChangeEvent, ChangeKind};

#[cfg(target_os = "linux")]
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent};

#[cfg(target_os = "linux")]
use std::os::fd::{AsFd, AsRawFd, RawFd};

#[cfg(target_os = "linux")]
use tokio::io::unix::AsyncFd;

/// inotify-based change source
#[derive(Debug, Clone, Copy, Default)]
pub struct InotifyChangeSource;

impl InotifyChangeSource {
    pub fn new() -> Self {
        Self
    }
}

/// Owned inotify instance, pollable by the Tokio reactor
#[cfg(target_os = "linux")]
struct InotifyFd(Inotify);

#[cfg(target_os = "linux")]
impl AsRawFd for InotifyFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_fd().as_raw_fd()
    }
}

#[cfg(target_os = "linux")]
fn watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_MODIFY
        | AddWatchFlags::IN_CLOSE_WRITE
        | AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
}

#[cfg(target_os = "linux")]
fn change_kind(mask: AddWatchFlags) -> ChangeKind {
    if mask.intersects(AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_CLOSE_WRITE) {
        ChangeKind::Modified
    } else if mask.contains(AddWatchFlags::IN_CREATE) {
        ChangeKind::Created
    } else if mask.contains(AddWatchFlags::IN_MOVED_TO) {
        ChangeKind::Renamed
    } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
        ChangeKind::Removed
    } else {
        ChangeKind::Other
    }
}

#[cfg(target_os = "linux")]
impl ChangeSource for InotifyChangeSource {
    fn watch(&self, path: &Path, cancel: CancellationToken) -> Result<ChangeStream> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::watch(format!("Not a file path: {}", path.display())))?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|e| Error::watch(format!("inotify init failed: {}", e)))?;
        inotify
            .add_watch(&dir, watch_mask())
            .map_err(|e| Error::watch(format!("inotify add watch {} failed: {}", dir.display(), e)))?;
        let fd = AsyncFd::new(InotifyFd(inotify))
            .map_err(|e| Error::watch(format!("inotify registration failed: {}", e)))?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let path = path.to_path_buf();

        tokio::spawn(async move {
            loop {
                let mut guard = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ready = fd.readable() => match ready {
                        Ok(guard) => guard,
                        Err(e) => {
                            tracing::error!(error = %e, "inotify poll failed");
                            break;
                        }
                    },
                };

                let events: Vec<InotifyEvent> =
                    match guard.try_io(|inner| inner.get_ref().0.read_events().map_err(std::io::Error::from)) {
                        Ok(Ok(events)) => events,
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "inotify read failed");
                            break;
                        }
                        // Spurious wakeup, readiness was cleared
                        Err(_would_block) => continue,
                    };

                for event in events {
                    if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                        tracing::warn!("inotify queue overflow (events may be lost)");
                    } else if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                        tracing::error!(dir = %dir.display(), "watched directory is gone");
                        return;
                    } else if event.name.as_deref() != Some(file_name.as_os_str()) {
                        continue;
                    }

                    let change = ChangeEvent::new(&path, change_kind(event.mask));
                    tracing::trace!(path = %path.display(), kind = ?change.kind, "inotify event");
                    if tx.send(change).is_err() {
                        // Consumer went away
                        return;
                    }
                }
            }
            tracing::debug!(path = %path.display(), "inotify watch released");
        });

        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }

    fn source_name(&self) -> &'static str {
        "inotify"
    }
}

#[cfg(not(target_os = "linux"))]
impl ChangeSource for InotifyChangeSource {
    fn watch(&self, path: &Path, _cancel: CancellationToken) -> Result<ChangeStream> {
        Err(Error::watch(format!(
            "inotify is only available on Linux, cannot watch {}",
            path.display()
        )))
    }

    fn source_name(&self) -> &'static str {
        "inotify"
    }
}

/// Factory for creating inotify change sources
pub struct InotifyFactory;

impl ChangeSourceFactory for InotifyFactory {
    #[cfg(target_os = "linux")]
    fn create(&self) -> Result<Box<dyn ChangeSource>> {
        Ok(Box::new(InotifyChangeSource::new()))
    }

    #[cfg(not(target_os = "linux"))]
    fn create(&self) -> Result<Box<dyn ChangeSource>> {
        Err(Error::config("inotify change source is only available on Linux"))
    }
}

/// Register the inotify change source with a registry
pub fn register(registry: &Registry) {
    registry.register_change_source("inotify", Box::new(InotifyFactory));
}
