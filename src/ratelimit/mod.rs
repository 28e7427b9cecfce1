//! Rate limiting logic and counting store backends.

mod keys;
mod limiter;
mod memory;
mod policy;
mod redis;
mod store;

pub use keys::KeySpace;
pub use limiter::{Decision, RateLimiter, WINDOW};
pub use memory::MemoryStore;
pub use policy::{ClassLimits, ClientClass, LimitPolicy};
pub use redis::RedisStore;
pub use store::{CountingStore, StoreError};
