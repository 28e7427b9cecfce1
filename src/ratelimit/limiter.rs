//! Core rate decision engine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::keys::KeySpace;
use super::policy::{ClientClass, LimitPolicy};
use super::store::{CountingStore, StoreError};

/// Length of the counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted; `count` requests seen in the current window
    Allowed { count: u64 },
    /// An active block record exists for the identifier
    Blocked,
    /// This request crossed the limit and a block was requested
    LimitExceeded { count: u64 },
    /// The store could not be consulted, so the request is refused
    StoreUnavailable,
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Short name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed { .. } => "allowed",
            Decision::Blocked => "blocked",
            Decision::LimitExceeded { .. } => "limit_exceeded",
            Decision::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Decides whether a request from an identifier may proceed.
///
/// The limiter holds no mutable state of its own; all counting and blocking
/// lives in the [`CountingStore`], so a single instance can be shared across
/// tasks freely. Every store failure on the read path denies the request.
pub struct RateLimiter {
    store: Arc<dyn CountingStore>,
    policy: LimitPolicy,
    keys: KeySpace,
    store_timeout: Option<Duration>,
}

impl RateLimiter {
    /// Create a rate limiter over `store` with the given limits.
    pub fn new(store: Arc<dyn CountingStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            policy,
            keys: KeySpace::default(),
            store_timeout: None,
        }
    }

    /// Use a different key space for store records.
    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    /// Bound every store call; a call that runs longer counts as a failure.
    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The configured limits.
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// The key space store records are written under.
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Whether a request from `identifier` under `class` is admitted.
    pub async fn allow(&self, identifier: &str, class: ClientClass) -> bool {
        self.check(identifier, class).await.is_allowed()
    }

    /// Check a request and report why it was admitted or refused.
    ///
    /// The block check runs before the increment, so a blocked identifier's
    /// counter stays frozen until the block lapses.
    pub async fn check(&self, identifier: &str, class: ClientClass) -> Decision {
        let limits = self.policy.limits_for(class);

        let blocked_key = self.keys.blocked(identifier);
        match self.bounded(self.store.is_blocked(&blocked_key)).await {
            Ok(false) => {}
            Ok(true) => {
                trace!(identifier = %identifier, class = %class, "Identifier is blocked");
                return Decision::Blocked;
            }
            Err(e) => {
                warn!(error = %e, identifier = %identifier, "Block check failed, denying request");
                return Decision::StoreUnavailable;
            }
        }

        let requests_key = self.keys.requests(identifier);
        let count = match self.bounded(self.store.increment(&requests_key, WINDOW)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, identifier = %identifier, "Increment failed, denying request");
                return Decision::StoreUnavailable;
            }
        };

        if count > limits.limit {
            debug!(
                identifier = %identifier,
                class = %class,
                count = count,
                limit = limits.limit,
                block_duration = ?limits.block_duration,
                "Rate limit exceeded, blocking identifier"
            );
            if let Err(e) = self
                .bounded(self.store.block(&blocked_key, limits.block_duration))
                .await
            {
                warn!(error = %e, identifier = %identifier, "Failed to record block");
            }
            return Decision::LimitExceeded { count };
        }

        trace!(
            identifier = %identifier,
            class = %class,
            count = count,
            limit = limits.limit,
            "Request admitted"
        );
        Decision::Allowed { count }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match self.store_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| StoreError::Timeout(timeout))?,
            None => call.await,
        }
    }
}
