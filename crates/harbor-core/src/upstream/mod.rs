//! Upstream registry collaborators
//!
//! Provides manifest verification for rewritten references and the Harbor
//! projects cache used for dynamic proxy-cache discovery.

mod projects;
mod verifier;

pub use projects::{
    HarborProject, ProjectsApi, ProjectsCache, ProjectsSnapshot, registry_proxies,
    spawn_resync_task,
};
pub use verifier::{RegistryVerifier, UpstreamVerifier, provides_platforms};
