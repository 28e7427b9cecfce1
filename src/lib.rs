//! Ratewall - Request Admission Gate
//!
//! This crate decides, per incoming request, whether to admit or reject it
//! based on a per-identifier budget. Counters and blocks live in a shared
//! TTL-capable store (Redis, or process memory), and callers are classified
//! as anonymous or credentialed, each class with its own limits.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod ratelimit;
pub mod server;
