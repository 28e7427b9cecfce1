//! Counting store backed by Redis.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::{
    Client, ClientLike, Config as RedisConfig, Error as RedisError, Expiration, KeysInterface,
    LuaInterface,
};
use fred::types::ExpireOptions;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::keys::KeySpace;
use super::store::{CountingStore, StoreError};

/// Lua script performing the increment and first-window expiry atomically.
const INCREMENT_SCRIPT: &str = include_str!("increment.lua");

/// Value stored under block keys.
const BLOCK_SENTINEL: &str = "blocked";

/// Redis implementation of [`CountingStore`].
///
/// Increments run as one Lua script so the INCR and its PEXPIRE can never be
/// split by a concurrent caller. Blocks are plain `SET .. PX` keys and
/// expire through Redis' own TTL.
///
/// Setting a block also caps the identifier's counter TTL at the block's
/// (`PEXPIRE .. LT`, Redis 7 or later), so the identifier starts a fresh
/// window once unblocked. This needs the [`KeySpace`] the rate limiter uses.
pub struct RedisStore {
    client: Client,
    keys: KeySpace,
    increment_sha: RwLock<String>,
}

impl RedisStore {
    /// Wrap an already connected client.
    ///
    /// Call [`RedisStore::load_script`] before the first increment; until then
    /// the first call pays for a script reload.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            keys: KeySpace::default(),
            increment_sha: RwLock::new(String::new()),
        }
    }

    /// Pair block and counter keys through `keys`.
    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    /// Connect to the Redis server at `url` and load the increment script.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = RedisConfig::from_url(url)?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await?;
        info!("Connected to Redis");

        let store = Self::new(client);
        store.load_script().await?;
        Ok(store)
    }

    /// Load (or reload) the increment script and remember its SHA.
    pub async fn load_script(&self) -> Result<(), StoreError> {
        let sha: String = self.client.script_load(INCREMENT_SCRIPT).await?;
        debug!(sha = %sha, "Increment script loaded into Redis");
        *self.increment_sha.write() = sha;
        Ok(())
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn is_noscript_error(error: &RedisError) -> bool {
        error.to_string().contains("NOSCRIPT")
    }

    async fn eval_increment(&self, key: &str, window_ms: u64) -> Result<i64, RedisError> {
        let sha = self.increment_sha.read().clone();
        self.client
            .evalsha(sha, vec![key], vec![window_ms.to_string()])
            .await
    }
}

/// Milliseconds for a Redis expiry, never zero since Redis rejects that.
fn expiry_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let window_ms = expiry_millis(window);

        let count = match self.eval_increment(key, window_ms).await {
            Ok(count) => count,
            Err(e) if Self::is_noscript_error(&e) => {
                warn!("NOSCRIPT error, reloading increment script");
                self.load_script().await?;
                self.eval_increment(key, window_ms).await?
            }
            Err(e) => return Err(e.into()),
        };

        u64::try_from(count)
            .map_err(|_| StoreError::UnexpectedReply(format!("negative count {}", count)))
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), StoreError> {
        let ttl_ms = i64::try_from(expiry_millis(duration)).unwrap_or(i64::MAX);
        self.client
            .set::<(), _, _>(key, BLOCK_SENTINEL, Some(Expiration::PX(ttl_ms)), None, false)
            .await?;

        if let Some(requests_key) = self.keys.requests_for_blocked(key) {
            let _: i64 = self
                .client
                .pexpire(requests_key, ttl_ms, Some(ExpireOptions::LT))
                .await?;
        }
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        let exists: bool = self.client.exists(key).await?;
        Ok(exists)
    }
}
