//! HTTP endpoint handler functions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;

use super::types::*;
use super::ServerState;

/// Maximum request body size in bytes (1 MB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn health_handler(State(state): State<Arc<ServerState>>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_hash: state.model_hash.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn model_handler(State(state): State<Arc<ServerState>>) -> axum::Json<ModelInfoResponse> {
    state.usage.ep_model.fetch_add(1, Ordering::Relaxed);

    let params = state.engine.params();
    axum::Json(ModelInfoResponse {
        channel_labels: params.channel_labels().to_vec(),
        emotion_labels: params.emotion_labels().to_vec(),
        example_values: state.example_values.clone(),
        model_hash: state.model_hash.clone(),
    })
}

/// `POST /api/v1/predict` with `{"values": [...]}`.
///
/// Malformed JSON is a 400. Engine errors (wrong length, non-finite values,
/// overflow) are a 422, as `success: false` with the error message.
pub async fn predict_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> (StatusCode, axum::Json<PredictResponse>) {
    let start = Instant::now();
    state.usage.ep_predict.fetch_add(1, Ordering::Relaxed);

    let request: PredictRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.usage.record_error();
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(PredictResponse::failure(
                    format!("Invalid JSON: {}", e),
                    start.elapsed().as_millis() as u64,
                )),
            );
        }
    };

    match state.engine.predict(&request.values) {
        Ok(prediction) => {
            let processing_time_ms = start.elapsed().as_millis() as u64;
            state.usage.record("predict", &prediction, processing_time_ms);
            (
                StatusCode::OK,
                axum::Json(PredictResponse {
                    success: true,
                    error: None,
                    prediction: Some(prediction),
                    processing_time_ms,
                }),
            )
        }
        Err(e) => {
            state.usage.record_error();
            tracing::debug!(error = %e, "prediction rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                axum::Json(PredictResponse::failure(
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                )),
            )
        }
    }
}

pub async fn stats_handler(State(state): State<Arc<ServerState>>) -> axum::Json<StatsResponse> {
    state.usage.ep_stats.fetch_add(1, Ordering::Relaxed);

    axum::Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model_hash: state.model_hash.clone(),
        requests: RequestStats {
            total: state.usage.total_requests.load(Ordering::Relaxed),
            errors: state.usage.total_errors.load(Ordering::Relaxed),
        },
        predictions: state.usage.label_counts(),
        endpoints: EndpointStats {
            predict: state.usage.ep_predict.load(Ordering::Relaxed),
            model: state.usage.ep_model.load(Ordering::Relaxed),
            stats: state.usage.ep_stats.load(Ordering::Relaxed),
        },
    })
}
