//! API routes

pub mod admission;
mod health;
pub mod metrics;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

/// Admission reviews carry a single pod; 8MB is well above any pod manifest
const MAX_REVIEW_SIZE: usize = 8 * 1024 * 1024;

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Probes
        .merge(health::routes())
        // Mutating admission webhook
        .merge(admission::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REVIEW_SIZE));

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
