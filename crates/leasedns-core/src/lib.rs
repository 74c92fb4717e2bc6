// # leasedns-core
//
// Core library bridging an ISC dhcpd lease file to a DNS record store.
//
// ## Architecture Overview
//
// - **LeaseParser**: Extracts (hostname, address) leases from lease file text
// - **Coordinator**: Coalesces bursts of change signals into single sync runs
// - **LeaseBackend**: Writes records + heartbeats and expires stale leases
// - **TimeoutGroup**: Counted shutdown barrier with a deadline
// - **KvStore**: Trait for the record store (etcd, memory)
// - **ChangeSource**: Trait for lease file change notifications (inotify)
// - **Registry**: Plugin-based registry for stores and change sources
//
// ## Flow
//
// change event → Coordinator::signal → LeaseSync::sync → LeaseBackend::put
// timer        → LeaseSync::sync → LeaseBackend::cleanup
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from store and watch implementations
// 2. **Event-Driven**: File changes arrive as async streams, never by polling
// 3. **Plugin-Based**: Stores are registered dynamically, no hard-coded if-else
// 4. **Idempotency**: Record and heartbeat keys are pure functions of the lease

pub mod traits;
pub mod backend;
pub mod cleaner;
pub mod coordinator;
pub mod extractor;
pub mod lease;
pub mod registry;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod store;
pub mod watcher;

// Re-export core types for convenience
pub use traits::{ChangeSource, KvStore};
pub use backend::{CleanupReport, LeaseBackend};
pub use cleaner::run_cleaner;
pub use coordinator::Coordinator;
pub use extractor::LeaseParser;
pub use lease::Lease;
pub use registry::Registry;
pub use config::{BridgeConfig, StoreConfig};
pub use error::{Error, Result};
pub use shutdown::TimeoutGroup;
pub use store::MemoryKvStore;
pub use watcher::{LeaseSync, coordinate_watcher};
