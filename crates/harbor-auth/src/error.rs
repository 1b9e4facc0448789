//! Credential resolution error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Failed to read secret {name}: {source}")]
    SecretRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid docker config: {0}")]
    InvalidDockerConfig(#[from] serde_json::Error),

    #[error("Only a docker config with exactly one auth entry is supported, found {0}")]
    UnsupportedAuthCount(usize),

    #[error("Invalid auth field for registry {0}")]
    InvalidAuthField(String),
}
