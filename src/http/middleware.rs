//! Axum middleware enforcing rate limit decisions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::identity::IdentityExtractor;
use crate::ratelimit::RateLimiter;

/// Body of every rejection.
pub const REJECTION_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Shared state of the rate limit gate.
#[derive(Clone)]
pub struct GateState {
    pub limiter: Arc<RateLimiter>,
    pub identity: Arc<IdentityExtractor>,
}

impl GateState {
    pub fn new(limiter: RateLimiter, identity: IdentityExtractor) -> Self {
        Self {
            limiter: Arc::new(limiter),
            identity: Arc::new(identity),
        }
    }
}

/// Rejection returned when the rate limiter refuses a request.
#[derive(Debug, Clone, Copy)]
pub struct TooManyRequests;

impl IntoResponse for TooManyRequests {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, REJECTION_MESSAGE).into_response()
    }
}

/// Admit or reject a request according to the rate limiter.
///
/// Admitted requests reach the next handler untouched. Store failures are
/// rejected like any other refusal.
pub async fn rate_limit(
    State(gate): State<GateState>,
    request: Request,
    next: Next,
) -> Result<Response, TooManyRequests> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = gate.identity.identify(request.headers(), peer);

    let decision = gate.limiter.check(&identity.identifier, identity.class).await;
    if !decision.is_allowed() {
        debug!(
            identifier = %identity.identifier,
            class = %identity.class,
            decision = decision.as_str(),
            "Request rejected"
        );
        return Err(TooManyRequests);
    }

    Ok(next.run(request).await)
}
