//! Transformer for a fixed registry to proxy-cache mapping

use async_trait::async_trait;
use harbor_proxy::HarborApiClient;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::dynamic::lookup_proxy;
use super::{ContainerTransformer, RewriteOutcome};
use crate::config::{StaticConfig, validate_static};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::ImageReference;

/// How long a health check result is reused
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(10);

/// Whether Harbor is up; rewrites pointing at a down Harbor would break pulls
#[async_trait]
pub trait HarborHealthCheck: Send + Sync {
    async fn is_running(&self) -> Result<bool, CoreError>;
}

#[async_trait]
impl HarborHealthCheck for HarborApiClient {
    async fn is_running(&self) -> Result<bool, CoreError> {
        Ok(self.ping().await?)
    }
}

/// Rewrites images of configured registries to fixed Harbor projects
pub struct StaticTransformer {
    proxies: HashMap<String, String>,
    bypass: Vec<Regex>,
    health: Option<Arc<dyn HarborHealthCheck>>,
    /// Last health check result and when it was taken
    last_health: Mutex<Option<(Instant, bool)>>,
}

impl StaticTransformer {
    pub fn new(config: &StaticConfig) -> Result<Self, CoreError> {
        validate_static(config)?;

        let bypass = config
            .bypass_images
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| CoreError::RuleCompilation {
                    rule: "static bypass_images".to_string(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Static transformer caching {} registries, {} bypass patterns",
            config.registry_caches.len(),
            bypass.len()
        );

        Ok(Self {
            proxies: config
                .registry_caches
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bypass,
            health: None,
            last_health: Mutex::new(None),
        })
    }

    /// Only rewrite while the health check passes
    pub fn with_health_check(mut self, health: Arc<dyn HarborHealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Whether Harbor answers, checked at most once per `HEALTH_CACHE_TTL`
    async fn harbor_running(&self, health: &dyn HarborHealthCheck) -> bool {
        if let Some((checked_at, running)) = *self.last_health.lock() {
            if checked_at.elapsed() < HEALTH_CACHE_TTL {
                return running;
            }
        }

        let running = match health.is_running().await {
            Ok(running) => running,
            Err(e) => {
                warn!("Harbor health check failed: {}", e);
                false
            }
        };

        *self.last_health.lock() = Some((Instant::now(), running));
        running
    }
}

#[async_trait]
impl ContainerTransformer for StaticTransformer {
    fn name(&self) -> &str {
        "static"
    }

    async fn rewrite(
        &self,
        reference: &ImageReference,
        _platform: &Platform,
    ) -> Result<RewriteOutcome, CoreError> {
        let normalized = reference.normalized();
        if let Some(pattern) = self.bypass.iter().find(|r| r.is_match(&normalized)) {
            debug!("Bypassing {} because of {}", normalized, pattern);
            return Ok(RewriteOutcome::NoMatch);
        }

        let Some(proxy) = lookup_proxy(&self.proxies, reference.registry()) else {
            return Ok(RewriteOutcome::NoMatch);
        };

        if let Some(health) = &self.health {
            if !self.harbor_running(health.as_ref()).await {
                warn!("Harbor is not answering, not rewriting {}", reference);
                return Ok(RewriteOutcome::Unverified);
            }
        }

        Ok(RewriteOutcome::Rewritten(reference.with_registry(proxy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Health {
        running: AtomicBool,
        checks: AtomicUsize,
    }

    impl Health {
        fn new(running: bool) -> Self {
            Self {
                running: AtomicBool::new(running),
                checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HarborHealthCheck for Health {
        async fn is_running(&self) -> Result<bool, CoreError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.running.load(Ordering::SeqCst))
        }
    }

    fn config() -> StaticConfig {
        let mut config = StaticConfig::default();
        config.registry_caches.insert(
            "docker.io".to_string(),
            "harbor.example.com/dockerhub-proxy".to_string(),
        );
        config.registry_caches.insert(
            "quay.io".to_string(),
            "harbor.example.com/quay-proxy".to_string(),
        );
        config.bypass_images = vec!["^docker.io/library/busybox:".to_string()];
        config
    }

    async fn rewrite(t: &StaticTransformer, image: &str) -> RewriteOutcome {
        t.rewrite(
            &ImageReference::parse(image).unwrap(),
            &Platform::linux_amd64(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_static_rewrites() {
        let t = StaticTransformer::new(&config()).unwrap();

        assert_eq!(
            rewrite(&t, "nginx").await,
            RewriteOutcome::Rewritten(
                "harbor.example.com/dockerhub-proxy/library/nginx:latest".to_string()
            )
        );
        assert_eq!(
            rewrite(&t, "index.docker.io/library/nginx:1.25").await,
            RewriteOutcome::Rewritten(
                "harbor.example.com/dockerhub-proxy/library/nginx:1.25".to_string()
            )
        );
        assert_eq!(
            rewrite(&t, "quay.io/org/app:v1").await,
            RewriteOutcome::Rewritten("harbor.example.com/quay-proxy/org/app:v1".to_string())
        );
        assert_eq!(rewrite(&t, "busybox:1.36").await, RewriteOutcome::NoMatch);
        assert_eq!(
            rewrite(&t, "ghcr.io/org/app").await,
            RewriteOutcome::NoMatch
        );
    }

    #[tokio::test]
    async fn test_static_health_check() {
        let health = Arc::new(Health::new(false));
        let t = StaticTransformer::new(&config())
            .unwrap()
            .with_health_check(health.clone());

        assert_eq!(rewrite(&t, "nginx").await, RewriteOutcome::Unverified);

        // the cached result expires before Harbor is asked again
        health.running.store(true, Ordering::SeqCst);
        assert_eq!(rewrite(&t, "nginx").await, RewriteOutcome::Unverified);

        *t.last_health.lock() = Some((Instant::now() - HEALTH_CACHE_TTL, false));
        assert!(matches!(
            rewrite(&t, "nginx").await,
            RewriteOutcome::Rewritten(_)
        ));
        assert_eq!(health.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_health_check_is_cached() {
        let health = Arc::new(Health::new(true));
        let t = StaticTransformer::new(&config())
            .unwrap()
            .with_health_check(health.clone());

        for image in ["nginx", "redis:7", "quay.io/org/app:v1", "nginx:1.25"] {
            assert!(matches!(
                rewrite(&t, image).await,
                RewriteOutcome::Rewritten(_)
            ));
        }
        assert_eq!(health.checks.load(Ordering::SeqCst), 1);

        // unmatched and bypassed images never trigger a check
        t.last_health.lock().take();
        assert_eq!(rewrite(&t, "busybox:1.36").await, RewriteOutcome::NoMatch);
        assert_eq!(
            rewrite(&t, "ghcr.io/org/app").await,
            RewriteOutcome::NoMatch
        );
        assert_eq!(health.checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_static_rejects_bad_bypass() {
        let mut config = config();
        config.bypass_images = vec!["(".to_string()];
        assert!(matches!(
            StaticTransformer::new(&config),
            Err(CoreError::RuleCompilation { .. })
        ));
    }
}
