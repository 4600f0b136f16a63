//! Health endpoint.
//!
//! `GET /health` is exempt from rate limiting and from the shutdown guard so
//! load balancers can watch an instance drain:
//!
//! - **Running**: `200 OK`, `"status": "ok"`
//! - **Draining**: `503 Service Unavailable`, `"status": "shutting_down"`

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;
use crate::utils::memory_usage;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "uptime": 12.5,
///   "timestamp": "2024-01-15T10:30:00Z",
///   "memory": { "rssBytes": 10485760, "virtualBytes": 41943040, "peakRssBytes": 12582912 }
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status) = if state.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            uptime: state.uptime().as_secs_f64(),
            timestamp: Utc::now(),
            memory: memory_usage(),
        }),
    )
}
