//! Liveness and readiness endpoints

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    fn new(status: &str, message: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            message,
        }
    }
}

/// Liveness handler
async fn healthz() -> Json<HealthResponse> {
    metrics::counter!("hcw_health_checks_total", "probe" => "liveness").increment(1);

    Json(HealthResponse::new("healthy", None))
}

/// Readiness handler; not ready until every transformer is
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    metrics::counter!("hcw_health_checks_total", "probe" => "readiness").increment(1);

    match state.chain.ready() {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::new("ready", None))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("not ready", Some(e.to_string()))),
        ),
    }
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
