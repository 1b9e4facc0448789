//! Transformer driven by proxy-cache projects discovered in Harbor

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::{ContainerTransformer, RewriteOutcome};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::{BARE_REGISTRY, ImageReference};
use crate::upstream::{ProjectsCache, registry_proxies};

/// Hosts that all serve Docker Hub
const DOCKER_HUB_ALIASES: &[&str] = &[
    BARE_REGISTRY,
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

/// Find the proxy for a registry host, treating Docker Hub aliases as one registry
pub(super) fn lookup_proxy<'a, S>(
    proxies: &'a HashMap<String, S>,
    registry: &str,
) -> Option<&'a S> {
    if let Some(proxy) = proxies.get(registry) {
        return Some(proxy);
    }

    if DOCKER_HUB_ALIASES.contains(&registry) {
        return DOCKER_HUB_ALIASES
            .iter()
            .find_map(|alias| proxies.get(*alias));
    }

    None
}

/// Rewrites images whose registry has a proxy-cache project in Harbor
pub struct DynamicTransformer {
    cache: ProjectsCache,
    harbor_host: String,
}

impl DynamicTransformer {
    /// `harbor_host` is the host (and port) rewritten images point at
    pub fn new(cache: ProjectsCache, harbor_host: impl Into<String>) -> Self {
        Self {
            cache,
            harbor_host: harbor_host.into(),
        }
    }

    pub fn cache(&self) -> &ProjectsCache {
        &self.cache
    }
}

#[async_trait]
impl ContainerTransformer for DynamicTransformer {
    fn name(&self) -> &str {
        "dynamic"
    }

    async fn rewrite(
        &self,
        reference: &ImageReference,
        _platform: &Platform,
    ) -> Result<RewriteOutcome, CoreError> {
        // an empty cache is filled inline by the first caller
        let projects = self.cache.list().await?;
        let proxies = registry_proxies(&self.harbor_host, &projects);

        match lookup_proxy(&proxies, reference.registry()) {
            Some(proxy) => {
                debug!("Registry {} is cached by {}", reference.registry(), proxy);
                Ok(RewriteOutcome::Rewritten(reference.with_registry(proxy)))
            }
            None => Ok(RewriteOutcome::NoMatch),
        }
    }

    fn ready(&self) -> Result<(), CoreError> {
        if self.cache.ready() {
            Ok(())
        } else {
            Err(CoreError::NotReady("harbor projects cache".to_string()))
        }
    }
}
