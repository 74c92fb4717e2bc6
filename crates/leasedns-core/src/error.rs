//! Error types for the lease bridge
//!
//! This module defines all error types used throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for lease bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the lease bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Record store errors (unreachable, rejected request, bad response)
    #[error("Store error: {0}")]
    Store(String),

    /// Change source errors (watch could not be established or broke)
    #[error("Watch error: {0}")]
    Watch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (lease file unreadable, socket failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from store APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Requested entity (factory, endpoint) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registered tasks did not finish before the shutdown deadline
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The periodic cleaner gave up after repeated failed passes
    #[error("Cleanup aborted after {failures} consecutive failed passes")]
    CleanupAborted {
        /// Number of consecutive failures observed
        failures: usize,
    },
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a watch error
    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
