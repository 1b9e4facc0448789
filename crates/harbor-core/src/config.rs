//! Rewrite rule and discovery configuration types
//!
//! These types are shared across crates. The configuration file itself is
//! loaded by the binary, which hands the sections below to harbor-core.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::ImageReference;

/// A static rewrite rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule name, also used as metric label
    pub name: String,
    /// Regular expressions matched against the normalized reference (any may match)
    #[serde(default)]
    pub matches: Vec<String>,
    /// Regular expressions that veto the rule when any matches
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Replacement registry, `host[:port][/path-prefix]`
    pub replace: String,
    /// Verify the rewritten image exists before using it
    #[serde(default)]
    pub check_upstream: bool,
    /// Platforms a manifest list must provide, `os/arch`
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    /// Pull secret used for verification
    #[serde(default)]
    pub auth_secret_name: Option<String>,
    /// Add `auth_secret_name` to the pod's image pull secrets on rewrite
    #[serde(default)]
    pub replace_image_pull_secrets: bool,
}

impl RuleConfig {
    pub fn new(name: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matches: Vec::new(),
            excludes: Vec::new(),
            replace: replace.into(),
            check_upstream: false,
            platforms: default_platforms(),
            auth_secret_name: None,
            replace_image_pull_secrets: false,
        }
    }

    pub fn with_matches<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matches = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Parsed `platforms`
    pub fn parsed_platforms(&self) -> Result<Vec<Platform>, CoreError> {
        self.platforms.iter().map(|p| p.parse()).collect()
    }
}

/// Dynamic proxy-cache discovery through the Harbor API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicConfig {
    /// Harbor base URL, e.g. `https://harbor.example.com`
    pub harbor_endpoint: String,
    /// How often projects are re-fetched
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Harbor API request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl DynamicConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Fixed registry to proxy-cache project mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Upstream registry host -> `harbor-host/project`
    #[serde(default)]
    pub registry_caches: BTreeMap<String, String>,
    /// Regular expressions of images that are never rewritten
    #[serde(default)]
    pub bypass_images: Vec<String>,
    /// Only rewrite while the Harbor API answers
    #[serde(default)]
    pub verify_harbor_api: bool,
    /// Harbor base URL, required with `verify_harbor_api`
    #[serde(default)]
    pub harbor_endpoint: Option<String>,
}

fn default_platforms() -> Vec<String> {
    vec![Platform::linux_amd64().to_string()]
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> usize {
    20
}

/// Validate rules before compilation
///
/// Regex syntax is checked when the rules are compiled.
pub fn validate_rules(rules: &[RuleConfig]) -> Result<(), CoreError> {
    let mut seen = HashSet::new();

    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "rule name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(rule.name.as_str()) {
            return Err(CoreError::InvalidConfig(format!(
                "duplicate rule name '{}'",
                rule.name
            )));
        }

        if rule.matches.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "rule '{}' has no match patterns",
                rule.name
            )));
        }

        validate_replacement(&rule.name, &rule.replace)?;

        if rule.check_upstream && rule.platforms.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "rule '{}' checks upstream but lists no platforms",
                rule.name
            )));
        }
        rule.parsed_platforms()?;

        if rule.replace_image_pull_secrets
            && rule.auth_secret_name.as_deref().is_none_or(str::is_empty)
        {
            return Err(CoreError::InvalidConfig(format!(
                "rule '{}' replaces image pull secrets but has no auth_secret_name",
                rule.name
            )));
        }
    }

    Ok(())
}

/// Validate a static registry mapping
pub fn validate_static(config: &StaticConfig) -> Result<(), CoreError> {
    for (registry, target) in &config.registry_caches {
        if registry.is_empty() || registry.contains('/') {
            return Err(CoreError::InvalidConfig(format!(
                "registry_caches key '{}' must be a registry host",
                registry
            )));
        }
        validate_replacement(registry, target)?;
    }

    if config.verify_harbor_api && config.harbor_endpoint.as_deref().is_none_or(str::is_empty) {
        return Err(CoreError::InvalidConfig(
            "verify_harbor_api requires harbor_endpoint".to_string(),
        ));
    }

    Ok(())
}

/// Validate dynamic discovery settings
pub fn validate_dynamic(config: &DynamicConfig) -> Result<(), CoreError> {
    if config.harbor_endpoint.trim().is_empty() {
        return Err(CoreError::InvalidConfig(
            "dynamic harbor_endpoint cannot be empty".to_string(),
        ));
    }

    for (field, value) in [
        ("resync_interval_secs", config.resync_interval_secs),
        ("timeout_secs", config.timeout_secs),
        ("page_size", config.page_size as u64),
    ] {
        if value == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "dynamic {} must be greater than zero",
                field
            )));
        }
    }

    Ok(())
}

/// A replacement must yield valid references, so try it on a known image
fn validate_replacement(owner: &str, replace: &str) -> Result<(), CoreError> {
    let replace = replace.trim_end_matches('/');
    if replace.is_empty() {
        return Err(CoreError::InvalidConfig(format!(
            "'{}' has an empty replacement registry",
            owner
        )));
    }

    let sample = format!("{}/library/busybox:latest", replace);
    match ImageReference::parse(&sample) {
        Ok(parsed) if parsed.to_string() == sample => Ok(()),
        _ => Err(CoreError::InvalidConfig(format!(
            "'{}' has an invalid replacement registry '{}'",
            owner, replace
        ))),
    }
}
