//! HTTP server hosting the rate limit gate.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{RatewallConfig, StoreBackend};
use crate::error::{RatewallError, Result};
use crate::http::{create_router, GateState, IdentityExtractor};
use crate::ratelimit::{CountingStore, MemoryStore, RateLimiter, RedisStore};

/// Build the gate state described by `config`, connecting to Redis if needed.
pub async fn build_gate(config: &RatewallConfig) -> Result<GateState> {
    let keys = config.store.key_space();
    let store: Arc<dyn CountingStore> = match config.store.backend {
        StoreBackend::Redis => {
            info!(redis_addr = %config.store.redis_addr, "Connecting to Redis");
            let store = RedisStore::connect(&config.store.redis_url()).await?;
            Arc::new(store.with_key_space(keys.clone()))
        }
        StoreBackend::Memory => Arc::new(MemoryStore::with_key_space(keys.clone())),
    };

    let limiter = RateLimiter::new(store, config.rate_limiting.policy())
        .with_key_space(keys)
        .with_store_timeout(config.store.call_timeout());
    let identity = IdentityExtractor::new(
        &config.rate_limiting.credential_header,
        config.rate_limiting.trust_proxy,
    )?;

    info!(
        store = ?config.store.backend,
        anonymous_limit = config.rate_limiting.anonymous_limit,
        credentialed_limit = config.rate_limiting.credentialed_limit,
        "Rate limiter initialized"
    );
    Ok(GateState::new(limiter, identity))
}

/// HTTP server for the gated application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Router with the gate applied
    router: Router,
}

impl HttpServer {
    /// Create a new server around the gate state.
    pub fn new(addr: SocketAddr, state: GateState) -> Self {
        Self {
            addr,
            router: create_router(state),
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// Peer addresses are recorded for every connection so the gate can
    /// identify anonymous callers. The server shuts down when `signal`
    /// resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            RatewallError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ClientClass, LimitPolicy};

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), LimitPolicy::default());
        let identity = IdentityExtractor::new("API_KEY", false).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::new(addr, GateState::new(limiter, identity));

        server.serve_with_shutdown(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_build_gate_with_memory_store() {
        let mut config = RatewallConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.rate_limiting.anonymous_limit = 1;

        let gate = build_gate(&config).await.unwrap();

        assert!(gate.limiter.allow("10.0.0.1", ClientClass::Anonymous).await);
        assert!(!gate.limiter.allow("10.0.0.1", ClientClass::Anonymous).await);
        assert_eq!(gate.identity.credential_header().as_str(), "api_key");
    }

    #[tokio::test]
    async fn test_build_gate_rejects_bad_header_name() {
        let mut config = RatewallConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.rate_limiting.credential_header = "not valid".to_string();

        assert!(matches!(
            build_gate(&config).await,
            Err(RatewallError::Config(_))
        ));
    }
}
