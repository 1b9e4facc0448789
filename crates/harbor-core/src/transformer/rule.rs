//! Regex rules and the per-rule transformer

use async_trait::async_trait;
use harbor_auth::{CredentialSource, Credentials};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ContainerTransformer, RewriteOutcome};
use crate::config::{RuleConfig, validate_rules};
use crate::error::CoreError;
use crate::platform::{Platform, merge_platforms};
use crate::reference::ImageReference;
use crate::upstream::UpstreamVerifier;

/// Compiled size limit for a single pattern
const MAX_PATTERN_SIZE: usize = 1 << 20;

/// Default bound on an upstream check
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// A rule with its patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    config: RuleConfig,
    metric_label: String,
    platforms: Vec<Platform>,
    matches: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl CompiledRule {
    pub fn compile(config: RuleConfig) -> Result<Self, CoreError> {
        let matches = compile_patterns(&config.name, &config.matches)?;
        let excludes = compile_patterns(&config.name, &config.excludes)?;
        let platforms = config.parsed_platforms()?;

        Ok(Self {
            metric_label: metric_label(&config.name),
            platforms,
            matches,
            excludes,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// At least one match pattern hits and no exclude pattern does
    pub fn is_match(&self, normalized: &str) -> bool {
        self.matches.iter().any(|r| r.is_match(normalized))
            && !self.excludes.iter().any(|r| r.is_match(normalized))
    }
}

fn compile_patterns(rule: &str, patterns: &[String]) -> Result<Vec<Regex>, CoreError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .size_limit(MAX_PATTERN_SIZE)
                .build()
                .map_err(|source| CoreError::RuleCompilation {
                    rule: rule.to_string(),
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Validate and compile rules, preserving their order
pub fn compile_rules(configs: &[RuleConfig]) -> Result<Vec<CompiledRule>, CoreError> {
    validate_rules(configs)?;
    configs.iter().cloned().map(CompiledRule::compile).collect()
}

/// First rule, in order, that applies to the reference
pub fn find_match<'a>(
    rules: &'a [CompiledRule],
    reference: &ImageReference,
) -> Option<&'a CompiledRule> {
    let normalized = reference.normalized();
    rules.iter().find(|rule| rule.is_match(&normalized))
}

/// Metric label for a rule name: lowercase, anything outside `[a-z0-9_]` becomes `_`
pub fn metric_label(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Transformer for a single rule, optionally verifying rewritten images upstream
pub struct RuleTransformer {
    rule: CompiledRule,
    verifier: Arc<dyn UpstreamVerifier>,
    credentials: Option<Arc<dyn CredentialSource>>,
    timeout: Duration,
}

impl RuleTransformer {
    pub fn new(rule: CompiledRule, verifier: Arc<dyn UpstreamVerifier>) -> Self {
        Self {
            rule,
            verifier,
            credentials: None,
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rule(&self) -> &CompiledRule {
        &self.rule
    }

    async fn resolve_credentials(&self) -> Result<Option<Credentials>, CoreError> {
        let (Some(secret), Some(source)) = (
            self.rule.config.auth_secret_name.as_deref(),
            self.credentials.as_ref(),
        ) else {
            return Ok(None);
        };
        Ok(Some(source.credentials(secret).await?))
    }

    /// Check the candidate on its registry for the rule's platforms plus the pod's
    async fn check_upstream(
        &self,
        candidate: &ImageReference,
        platform: &Platform,
    ) -> Result<bool, CoreError> {
        let credentials = self.resolve_credentials().await?;
        let platforms = merge_platforms(self.rule.platforms.iter().chain([platform]));

        tokio::time::timeout(
            self.timeout,
            self.verifier
                .verify(candidate, &platforms, credentials.as_ref()),
        )
        .await
        .map_err(|_| CoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl ContainerTransformer for RuleTransformer {
    fn name(&self) -> &str {
        self.rule.name()
    }

    async fn rewrite(
        &self,
        reference: &ImageReference,
        platform: &Platform,
    ) -> Result<RewriteOutcome, CoreError> {
        if !self.rule.is_match(&reference.normalized()) {
            return Ok(RewriteOutcome::NoMatch);
        }

        let label = self.rule.metric_label.clone();
        let start = Instant::now();
        metrics::counter!("hcw_rules_rewrite_attempts_total", "name" => label.clone()).increment(1);

        let candidate = reference.with_registry(&self.rule.config.replace);

        if self.rule.config.check_upstream {
            let parsed = match ImageReference::parse(&candidate) {
                Ok(parsed) => parsed,
                Err(e) => {
                    metrics::counter!("hcw_rules_rewrite_errors_total", "name" => label)
                        .increment(1);
                    return Err(e);
                }
            };

            match self.check_upstream(&parsed, platform).await {
                Ok(true) => {
                    metrics::counter!("hcw_rules_upstream_checks_total", "name" => label.clone())
                        .increment(1);
                }
                Ok(false) => {
                    warn!(
                        "Rule {}: {} does not provide the required platforms, skipping",
                        self.name(),
                        candidate
                    );
                    metrics::counter!("hcw_rules_rewrite_errors_total", "name" => label)
                        .increment(1);
                    return Ok(RewriteOutcome::Unverified);
                }
                Err(e) => {
                    warn!(
                        "Rule {}: upstream check of {} failed: {}",
                        self.name(),
                        candidate,
                        e
                    );
                    metrics::counter!("hcw_rules_upstream_check_errors_total", "name" => label.clone())
                        .increment(1);
                    metrics::counter!("hcw_rules_rewrite_errors_total", "name" => label)
                        .increment(1);
                    return Ok(RewriteOutcome::Unverified);
                }
            }
        }

        debug!(
            "Rule {} rewrote {} to {}",
            self.name(),
            reference,
            candidate
        );
        metrics::counter!("hcw_rules_rewrite_success_total", "name" => label.clone()).increment(1);
        metrics::histogram!("hcw_rules_rewrite_duration_seconds", "name" => label)
            .record(start.elapsed().as_secs_f64());

        Ok(RewriteOutcome::Rewritten(candidate))
    }

    fn pull_secret(&self) -> Option<&str> {
        if self.rule.config.replace_image_pull_secrets {
            self.rule.config.auth_secret_name.as_deref()
        } else {
            None
        }
    }
}
