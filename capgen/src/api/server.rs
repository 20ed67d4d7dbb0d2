//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{middleware::require_api_key, routes};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::scheduler::JobScheduler;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to
    /// defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8080")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub scheduler: Arc<JobScheduler>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(scheduler: Arc<JobScheduler>, config: Arc<ServiceConfig>) -> Self {
        Self {
            start_time: Instant::now(),
            scheduler,
            config,
        }
    }
}

/// Assemble the router: job routes under `/api` behind the API-key check,
/// health at the root, tracing and CORS over everything.
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let api = routes::jobs::router().layer(axum::middleware::from_fn_with_state(
        state.clone(),
        require_api_key,
    ));

    let mut router = Router::new()
        .nest("/api", api)
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

/// Serve the API until the shutdown token fires.
pub async fn run(
    config: &ApiServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| Error::config(format!("invalid bind address: {e}")))?;

    let router = build_router(state, config.enable_cors);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
