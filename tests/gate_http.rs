//! HTTP-level tests of the rate limit gate.
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.
//! The limiter state is shared behind `Arc`, so counts carry across calls on
//! clones of the same router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use ratewall::http::{create_router, with_gate, GateState, IdentityExtractor, REJECTION_MESSAGE};
use ratewall::ratelimit::{ClassLimits, LimitPolicy, MemoryStore, RateLimiter};

fn policy(anonymous_limit: u64, credentialed_limit: u64) -> LimitPolicy {
    LimitPolicy {
        anonymous: ClassLimits {
            limit: anonymous_limit,
            block_duration: Duration::from_secs(60),
        },
        credentialed: ClassLimits {
            limit: credentialed_limit,
            block_duration: Duration::from_secs(60),
        },
    }
}

fn gate(store: Arc<MemoryStore>, policy: LimitPolicy) -> GateState {
    let limiter = RateLimiter::new(store, policy);
    let identity = IdentityExtractor::new("API_KEY", false).unwrap();
    GateState::new(limiter, identity)
}

fn app_with(store: Arc<MemoryStore>, policy: LimitPolicy) -> Router {
    create_router(gate(store, policy))
}

fn app(policy: LimitPolicy) -> Router {
    app_with(Arc::new(MemoryStore::new()), policy)
}

fn request(path: &str, peer: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header("API_KEY", token);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_allows_request_under_ip_limit() {
    let app = app(policy(1, 2));

    let (status, body) = send(&app, request("/", "192.168.1.1:12345", None)).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["message"], "Welcome! Your request was successful.");
}

#[tokio::test]
async fn test_blocks_request_over_ip_limit() {
    let app = app(policy(1, 2));

    let (first, _) = send(&app, request("/", "192.168.1.2:12345", None)).await;
    assert_eq!(first, StatusCode::OK);
    let (status, body) = send(&app, request("/", "192.168.1.2:12345", None)).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body.contains("you have reached the maximum number of requests"));
    assert_eq!(body, REJECTION_MESSAGE);
}

#[tokio::test]
async fn test_credential_uses_its_own_namespace() {
    let app = app(policy(1, 2));

    let (first, _) = send(&app, request("/", "192.168.1.3:12345", None)).await;
    assert_eq!(first, StatusCode::OK);

    let (second, _) = send(&app, request("/", "192.168.1.3:12345", None)).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);

    let (third, _) = send(
        &app,
        request("/", "192.168.1.3:12345", Some("my-secret-token")),
    )
    .await;
    assert_eq!(third, StatusCode::OK);
}

#[tokio::test]
async fn test_credentialed_limit_applies_to_token() {
    let app = app(policy(1, 2));

    for _ in 0..2 {
        let (status, _) = send(&app, request("/profile", "10.0.0.1:1", Some("token-x"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    // Different peer, same token: still the same identifier.
    let (status, _) = send(&app, request("/profile", "10.0.0.2:1", Some("token-x"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_peer_port_is_not_part_of_identifier() {
    let app = app(policy(1, 2));

    let (first, _) = send(&app, request("/", "192.168.1.9:1000", None)).await;
    assert_eq!(first, StatusCode::OK);
    let (status, _) = send(&app, request("/", "192.168.1.9:2000", None)).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_profile_route_behind_gate() {
    let app = app(policy(5, 20));

    let (status, body) = send(&app, request("/profile", "10.1.0.1:80", None)).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["user"], "Alex");
    assert_eq!(json["profile"], "expert");
}

#[tokio::test]
async fn test_store_failure_rejects() {
    let store = Arc::new(MemoryStore::new());
    store.fail_is_blocked(true);
    let app = app_with(store, policy(5, 20));

    let (status, _) = send(&app, request("/", "10.2.0.1:80", None)).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_request_without_peer_address_is_limited_as_unknown() {
    let app = app(policy(1, 2));
    let bare = || Request::builder().uri("/").body(Body::empty()).unwrap();

    let (first, _) = send(&app, bare()).await;
    let (second, _) = send(&app, bare()).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
}

async fn explode() -> &'static str {
    panic!("handler failure")
}

#[tokio::test]
async fn test_panicking_handler_returns_internal_error() {
    let routes = Router::new().route("/explode", get(explode));
    let app = with_gate(routes, gate(Arc::new(MemoryStore::new()), policy(5, 20)));

    let (status, _) = send(&app, request("/explode", "10.3.0.1:80", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The server keeps answering after the panic.
    let (status, _) = send(&app, request("/explode", "10.3.0.1:80", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_responses_carry_unique_request_ids() {
    let app = app(policy(1, 2));

    let first = app
        .clone()
        .oneshot(request("/", "10.4.0.1:80", None))
        .await
        .unwrap();
    let second = app
        .clone()
        .oneshot(request("/", "10.4.0.1:80", None))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let first_id = first.headers().get("x-request-id").unwrap();
    let second_id = second.headers().get("x-request-id").unwrap();
    assert!(!first_id.is_empty());
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn test_incoming_request_id_is_kept() {
    let app = app(policy(5, 20));
    let mut req = request("/", "10.4.0.2:80", None);
    req.headers_mut()
        .insert("x-request-id", "req-1234".parse().unwrap());

    let response = app.clone().oneshot(req).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-1234");
}
