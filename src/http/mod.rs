//! HTTP surface: request classification, the rate limit gate and routes.

mod identity;
mod middleware;
mod routes;

pub use identity::{remote_address, split_host, ClientIdentity, IdentityExtractor, UNKNOWN_ADDRESS};
pub use middleware::{rate_limit, GateState, TooManyRequests, REJECTION_MESSAGE};
pub use routes::{create_router, with_gate};
