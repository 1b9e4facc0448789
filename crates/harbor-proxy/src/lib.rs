//! Harbor Container Webhook HTTP clients
//!
//! This crate provides the registry v2 client used to inspect manifests on
//! proxy-cache registries and the Harbor API client used to discover
//! proxy-cache projects.

pub mod client;
pub mod error;
pub mod harbor;
pub mod link;
pub mod manifest;

pub use client::{RegistryClient, RegistryClientConfig};
pub use error::ProxyError;
pub use harbor::{HarborApiClient, HarborApiConfig, Project, ProjectSummary, RegistrySummary};
pub use manifest::{Manifest, ManifestKind, ManifestPlatform};
