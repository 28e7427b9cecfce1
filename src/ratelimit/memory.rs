//! In-process counting store.
//!
//! Suitable for a single instance or for tests. Expired records are dropped
//! when they are next touched, and every few writes a sweep reclaims the
//! expired records of callers that never came back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::keys::KeySpace;
use super::store::{CountingStore, StoreError};

/// A counter and the instant its window closes.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Instant,
}

impl WindowCounter {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Writes between two sweeps of expired records.
const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, WindowCounter>,
    blocks: HashMap<String, Instant>,
    writes: u64,
}

impl State {
    /// Count a write and report whether a sweep is due.
    fn note_write(&mut self, interval: u64) -> bool {
        self.writes = self.writes.wrapping_add(1);
        self.writes % interval == 0
    }
}

/// Counting store backed by two maps behind a single mutex.
///
/// When an expired block is observed, the counter of the same identifier is
/// discarded too, so the identifier starts a fresh window once unblocked.
/// This needs the [`KeySpace`] the rate limiter uses to pair the two keys.
pub struct MemoryStore {
    state: Mutex<State>,
    keys: KeySpace,
    sweep_interval: u64,
    fail_increment: AtomicBool,
    fail_block: AtomicBool,
    fail_is_blocked: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store using the default key space.
    pub fn new() -> Self {
        Self::with_key_space(KeySpace::default())
    }

    /// Create an empty store pairing keys through `keys`.
    pub fn with_key_space(keys: KeySpace) -> Self {
        Self {
            state: Mutex::new(State::default()),
            keys,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            fail_increment: AtomicBool::new(false),
            fail_block: AtomicBool::new(false),
            fail_is_blocked: AtomicBool::new(false),
        }
    }

    /// Sweep expired records every `writes` increments and blocks.
    pub fn with_sweep_interval(mut self, writes: u64) -> Self {
        self.sweep_interval = writes.max(1);
        self
    }

    /// Make subsequent `increment` calls fail.
    pub fn fail_increment(&self, fail: bool) {
        self.fail_increment.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `block` calls fail.
    pub fn fail_block(&self, fail: bool) {
        self.fail_block.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `is_blocked` calls fail.
    pub fn fail_is_blocked(&self, fail: bool) {
        self.fail_is_blocked.store(fail, Ordering::SeqCst);
    }

    /// Current count at `key`, if a live counter exists.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .counters
            .get(key)
            .filter(|c| c.is_live(now))
            .map(|c| c.count)
    }

    /// Number of counter records held, live or not yet reclaimed.
    pub fn counter_count(&self) -> usize {
        self.state.lock().counters.len()
    }

    /// Number of block records held, live or not yet reclaimed.
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Reclaim every expired counter and block.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, now);
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.counters.clear();
        state.blocks.clear();
    }

    /// Drop expired records. A lapsed block takes its identifier's counter
    /// with it, as in `is_blocked`.
    fn sweep_locked(&self, state: &mut State, now: Instant) {
        let (counters_before, blocks_before) = (state.counters.len(), state.blocks.len());

        let lapsed: Vec<String> = state
            .blocks
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in lapsed {
            state.blocks.remove(&key);
            if let Some(requests_key) = self.keys.requests_for_blocked(&key) {
                state.counters.remove(&requests_key);
            }
        }
        state.counters.retain(|_, c| c.is_live(now));

        debug!(
            counters_reclaimed = counters_before - state.counters.len(),
            blocks_reclaimed = blocks_before - state.blocks.len(),
            "Swept expired in-memory records"
        );
    }

    fn injected(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CountingStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        Self::injected(&self.fail_increment, "increment")?;

        let now = Instant::now();
        let mut state = self.state.lock();
        if state.note_write(self.sweep_interval) {
            self.sweep_locked(&mut state, now);
        }
        let counter = state
            .counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.is_live(now) {
                    c.count += 1;
                } else {
                    *c = WindowCounter {
                        count: 1,
                        expires_at: now + window,
                    };
                }
            })
            .or_insert(WindowCounter {
                count: 1,
                expires_at: now + window,
            });

        trace!(key = %key, count = counter.count, "Incremented in-memory counter");
        Ok(counter.count)
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), StoreError> {
        Self::injected(&self.fail_block, "block")?;

        let now = Instant::now();
        let mut state = self.state.lock();
        if state.note_write(self.sweep_interval) {
            self.sweep_locked(&mut state, now);
        }
        state.blocks.insert(key.to_string(), now + duration);
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        Self::injected(&self.fail_is_blocked, "is_blocked")?;

        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(&expires_at) = state.blocks.get(key) else {
            return Ok(false);
        };

        if now < expires_at {
            return Ok(true);
        }

        // Block lapsed: forget it along with the frozen counter.
        state.blocks.remove(key);
        if let Some(requests_key) = self.keys.requests_for_blocked(key) {
            state.counters.remove(&requests_key);
        }
        Ok(false)
    }
}
