//! Core traits for the lease bridge
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`KvStore`]: Record store with sort-by-value listings
//! - [`ChangeSource`]: File change notifications for the lease file

pub mod change_source;
pub mod kv_store;

pub use change_source::{ChangeEvent, ChangeKind, ChangeSource, ChangeSourceFactory, ChangeStream};
pub use kv_store::{KeyValue, KvStore, KvStoreFactory};
