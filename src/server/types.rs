//! Request/response types and configuration for the inference server.

use std::net::SocketAddr;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::engine::{LabelCounts, PredictionResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Port the browser UI has always been served on.
pub const DEFAULT_PORT: u16 = 5500;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (defaults to 127.0.0.1:5500; use 0.0.0.0 to expose externally)
    pub bind_addr: SocketAddr,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Path for JSONL access log
    pub access_log_path: String,
    /// Maximum access log file size in bytes before rotation (0 = no limit)
    pub max_access_log_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            rate_limit_rpm: 60,
            access_log_path: "eeg-emotion-access.jsonl".to_string(),
            max_access_log_bytes: 50 * 1024 * 1024, // 50 MB
        }
    }
}

/// Resolve the bind address: an explicit `--bind` wins, otherwise the default
/// loopback address with the port taken from `PORT` when set.
pub fn resolve_bind_addr(bind: Option<&str>, port_env: Option<&str>) -> Result<SocketAddr> {
    if let Some(bind) = bind {
        return bind
            .parse()
            .wrap_err_with(|| format!("Invalid bind address: {}", bind));
    }
    let mut addr = ServerConfig::default().bind_addr;
    if let Some(port) = port_env.map(str::trim).filter(|p| !p.is_empty()) {
        let port: u16 = port
            .parse()
            .wrap_err_with(|| format!("Invalid PORT value: {}", port))?;
        addr.set_port(port);
    }
    Ok(addr)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// One raw EEG reading, one value per channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub values: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    pub processing_time_ms: u64,
}

impl PredictResponse {
    pub fn failure(error: String, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error),
            prediction: None,
            processing_time_ms,
        }
    }
}

/// What the browser needs to build its input form.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub channel_labels: Vec<String>,
    pub emotion_labels: Vec<String>,
    pub example_values: Vec<f64>,
    pub model_hash: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_hash: String,
    pub uptime_seconds: u64,
}

/// Stats response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub model_hash: String,
    pub requests: RequestStats,
    /// Predictions served per emotion label, in class order
    pub predictions: LabelCounts,
    pub endpoints: EndpointStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointStats {
    pub predict: u64,
    pub model: u64,
    pub stats: u64,
}
