//! Application state

use harbor_core::{Platform, TransformerChain};
use std::sync::Arc;

/// Prometheus handle rendering the process-wide recorder
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Admission behaviour settings
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Platform assumed for pods without an os/arch node selector
    pub default_platform: Platform,
    /// Log every generated patch
    pub verbose: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            default_platform: Platform::linux_amd64(),
            verbose: false,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<TransformerChain>,
    pub settings: Arc<WebhookSettings>,
}

impl AppState {
    pub fn new(chain: Arc<TransformerChain>, settings: WebhookSettings) -> Self {
        Self {
            chain,
            settings: Arc::new(settings),
        }
    }
}
