//! Harbor Container Webhook HTTP API
//!
//! This crate provides the Axum-based HTTP API: the pod admission webhook,
//! liveness and readiness probes and the Prometheus metrics endpoint.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle, WebhookSettings};
