//! HTTP server exposing the inference engine.
//!
//! Parameters are loaded once at startup into an [`Engine`] shared behind
//! `Arc`; handlers never mutate it.
//!
//! Features:
//! - Per-IP rate limiting on `/api/v1/*` (LRU-bounded, IPv6 grouped by /64)
//! - JSONL access logging with size-based rotation (configurable via `max_access_log_bytes`)
//! - Permissive CORS so the static browser page can call the API
//! - Structured logging via [`tracing`]

pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod types;

pub use handlers::MAX_BODY_BYTES;
pub use logging::UsageMetrics;
pub use types::{
    resolve_bind_addr, EndpointStats, HealthResponse, ModelInfoResponse, PredictRequest,
    PredictResponse, RequestStats, ServerConfig, StatsResponse, DEFAULT_PORT,
};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use eyre::{Result, WrapErr};
use lru::LruCache;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::Engine;
use crate::params::ModelBundle;

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

pub struct ServerState {
    pub config: ServerConfig,
    pub engine: Arc<Engine>,
    /// Raw reading offered to clients as a form default
    pub example_values: Vec<f64>,
    pub model_hash: String,
    pub start_time: Instant,
    pub rate_limiters: Mutex<LruCache<IpAddr, Arc<middleware::IpRateLimiter>>>,
    pub usage: UsageMetrics,
}

impl ServerState {
    pub fn new(config: ServerConfig, engine: Engine, example_values: Vec<f64>) -> Self {
        let usage = UsageMetrics::new(
            &config.access_log_path,
            config.max_access_log_bytes,
            engine.params().emotion_labels(),
        );
        Self {
            model_hash: engine.model_hash().to_string(),
            config,
            engine: Arc::new(engine),
            example_values,
            start_time: Instant::now(),
            rate_limiters: middleware::new_rate_limiter_cache(),
            usage,
        }
    }

    /// Validate `bundle` and build the state around it.
    pub fn from_bundle(config: ServerConfig, bundle: &ModelBundle) -> Result<Self> {
        let engine = Engine::from_bundle(bundle).wrap_err("Model bundle rejected")?;
        Ok(Self::new(config, engine, bundle.example_values.clone()))
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Build the application router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`; rate limiting reads
/// the peer address.
pub fn router(state: Arc<ServerState>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/model", get(handlers::model_handler))
        .route("/api/v1/predict", post(handlers::predict_handler))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    // Any origin: the browser page may be opened from disk or another port.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/stats", get(handlers::stats_handler))
        .merge(api_routes)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig, bundle: ModelBundle) -> Result<()> {
    let rate_limit_rpm = config.rate_limit_rpm;
    let bind_addr = config.bind_addr;
    let access_log = config.access_log_path.clone();
    let state = Arc::new(ServerState::from_bundle(config, &bundle)?);
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", bind_addr))?;
    info!(
        bind = %bind_addr,
        model_hash = %state.model_hash,
        channels = state.engine.params().channel_count(),
        classes = state.engine.params().class_count(),
        "EEG emotion server listening"
    );
    info!("Endpoints: GET /health, GET /stats, GET /api/v1/model, POST /api/v1/predict");
    if rate_limit_rpm > 0 {
        info!(rate_limit_rpm, "rate limiting enabled");
    } else {
        info!("rate limiting disabled");
    }
    info!(access_log = %access_log);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let sigterm_recv = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm_recv = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down gracefully"),
        _ = sigterm_recv => info!("received SIGTERM, shutting down gracefully"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests::small_params;
    use std::sync::atomic::Ordering;

    fn state() -> ServerState {
        let config = ServerConfig {
            access_log_path: "/dev/null".to_string(),
            max_access_log_bytes: 0,
            ..Default::default()
        };
        ServerState::new(config, Engine::new(small_params()), vec![1.0, 2.0, 3.0])
    }

    #[test]
    fn test_state_carries_engine_hash() {
        let s = state();
        assert_eq!(s.model_hash, small_params().model_hash());
        assert_eq!(s.usage.label_counts().len(), 2);
    }

    #[test]
    fn test_from_bundle_rejects_bad_params() {
        let mut bundle = ModelBundle::from_params(&small_params());
        bundle.model.scaler_mean.pop();
        let config = ServerConfig {
            access_log_path: "/dev/null".to_string(),
            ..Default::default()
        };
        let err = ServerState::from_bundle(config, &bundle).err().unwrap();
        assert!(format!("{err:?}").contains("Dimension mismatch"));
    }

    #[test]
    fn test_stats_response_serialization() {
        let s = state();
        s.usage.record_error();
        let response = StatsResponse {
            uptime_seconds: 1,
            model_hash: s.model_hash.clone(),
            requests: RequestStats {
                total: s.usage.total_requests.load(Ordering::Relaxed),
                errors: s.usage.total_errors.load(Ordering::Relaxed),
            },
            predictions: s.usage.label_counts(),
            endpoints: EndpointStats {
                predict: 0,
                model: 0,
                stats: 1,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["requests"]["errors"], 1);
        assert_eq!(json["predictions"]["Calm"], 0);
        assert_eq!(json["endpoints"]["stats"], 1);
    }
}
