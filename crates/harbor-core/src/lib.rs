//! Harbor Container Webhook Core
//!
//! This crate provides the image rewriting engine: reference parsing and
//! normalization, rule compilation and matching, upstream verification of
//! rewritten images and the Harbor projects cache behind dynamic discovery.

pub mod config;
pub mod error;
pub mod platform;
pub mod reference;
pub mod transformer;
pub mod upstream;

pub use config::{
    DynamicConfig, RuleConfig, StaticConfig, validate_dynamic, validate_rules, validate_static,
};
pub use error::CoreError;
pub use platform::Platform;
pub use reference::{BARE_REGISTRY, DEFAULT_TAG, ImageReference, TagOrDigest};
pub use transformer::{
    CompiledRule, ContainerTransformer, DynamicTransformer, HarborHealthCheck, ImageRewrite,
    RewriteOutcome, RuleTransformer, StaticTransformer, TransformerChain, compile_rules,
    find_match, merge_pull_secrets,
};
pub use upstream::{
    HarborProject, ProjectsApi, ProjectsCache, RegistryVerifier, UpstreamVerifier,
    registry_proxies, spawn_resync_task,
};
