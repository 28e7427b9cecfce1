//! Router assembly and the demonstration endpoints behind the gate.

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::middleware::{rate_limit, GateState};

/// Build the application router with every route behind the rate limit gate.
pub fn create_router(state: GateState) -> Router {
    let routes = Router::new()
        .route("/", get(welcome))
        .route("/profile", get(profile));

    with_gate(routes, state)
}

/// Put `routes` behind the gate and the shared middleware stack.
///
/// Outermost first: request ID assignment, request tracing, panic recovery,
/// then the rate limit gate. A request keeps an incoming `x-request-id`;
/// otherwise it gets a UUID, and the response echoes it either way.
pub fn with_gate(routes: Router, state: GateState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state, rate_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "Welcome! Your request was successful." }))
}

async fn profile() -> Json<Value> {
    Json(json!({ "user": "Alex", "profile": "expert" }))
}
