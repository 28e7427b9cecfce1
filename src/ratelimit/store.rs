//! Storage contract shared by every counting store backend.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a counting store.
///
/// The rate limiter treats any of these as a reason to deny the request.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The Redis client reported a failure
    #[error("redis: {0}")]
    Redis(#[from] fred::error::Error),

    /// The store answered with something the adapter cannot interpret
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// A store call did not complete within the configured bound
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The store is not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Capability set a backend must provide for the rate limiter.
///
/// Implementations must linearize concurrent `increment` calls on the same
/// key; expiry of both record kinds belongs to the backend.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Atomically increment the counter at `key` and return the new count.
    ///
    /// An absent or expired counter starts at 1 and expires after `window`.
    /// A live counter keeps the expiry it was created with.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Mark `key` as blocked for `duration`. A later call overwrites the
    /// previous duration.
    async fn block(&self, key: &str, duration: Duration) -> Result<(), StoreError>;

    /// Whether a block record currently exists at `key`.
    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError>;
}
