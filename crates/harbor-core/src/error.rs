//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Failed to compile rule {rule:?} pattern {pattern:?}: {source}")]
    RuleCompilation {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid platform {0:?}, expected os/arch")]
    InvalidPlatform(String),

    #[error("Proxy error: {0}")]
    Proxy(#[from] harbor_proxy::ProxyError),

    #[error("Auth error: {0}")]
    Auth(#[from] harbor_auth::AuthError),

    #[error("Projects cache refresh failed: {0}")]
    Refresh(String),

    #[error("Transformer {0} is not ready")]
    NotReady(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl CoreError {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}
