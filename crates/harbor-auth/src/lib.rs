//! Harbor Container Webhook Credentials
//!
//! This crate resolves registry pull credentials from Docker client
//! config secrets for upstream manifest verification.

pub mod credentials;
pub mod error;
pub mod source;

pub use credentials::{Credentials, DockerAuthEntry, DockerConfigJson};
pub use error::AuthError;
pub use source::{CredentialSource, SecretDirSource, StaticSource, DOCKER_CONFIG_JSON_KEY};
