// # Store Implementations
//
// This module provides the in-process implementation of the KvStore trait.
// Remote stores live in their own crates.

pub mod memory;

pub use memory::{MemoryKvStore, MemoryKvStoreFactory};
