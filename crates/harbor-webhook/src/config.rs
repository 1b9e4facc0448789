//! Configuration loading

use anyhow::{Context, Result};
use harbor_core::{
    DynamicConfig, Platform, RuleConfig, StaticConfig, validate_dynamic, validate_rules,
    validate_static,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Prefix of environment variables overriding the file, e.g. `HCW__SERVER__PORT`
const ENV_PREFIX: &str = "HCW";
const ENV_SEPARATOR: &str = "__";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Registry client used to verify rewritten images
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Rewrite rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Proxy caches discovered from Harbor projects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicConfig>,
    /// Fixed registry to proxy cache mapping
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_caches: Option<StaticConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Enable TLS/HTTPS; the API server only calls webhooks over HTTPS
    #[serde(default)]
    pub enabled: bool,
    /// Path to TLS certificate file (PEM format)
    #[serde(default)]
    pub cert_path: Option<String>,
    /// Path to TLS private key file (PEM format)
    #[serde(default)]
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Admission behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Platform assumed for pods that do not select one
    #[serde(default)]
    pub default_platform: Platform,
    /// Log the JSON patch of every mutated pod
    #[serde(default)]
    pub verbose: bool,
    /// Directory holding mounted `kubernetes.io/dockerconfigjson` secrets
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_platform: Platform::default(),
            verbose: false,
            secrets_dir: default_secrets_dir(),
        }
    }
}

/// Registry client settings for upstream verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            skip_tls_verify: false,
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9443
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_secrets_dir() -> String {
    "/etc/harbor-container-webhook/secrets".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a file, overridden by `HCW__` environment variables
    pub fn load(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            info!("Loading configuration from {}", path);
        } else {
            info!("Config file not found at {}, using defaults", path);
        }

        let config: Config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file: {}", path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the webhook could not start with
    pub fn validate(&self) -> Result<()> {
        validate_rules(&self.rules).context("Invalid [[rules]]")?;

        if let Some(static_caches) = &self.static_caches {
            validate_static(static_caches).context("Invalid [static] section")?;
        }

        if let Some(dynamic) = &self.dynamic {
            validate_dynamic(dynamic).context("Invalid [dynamic] section")?;
        }

        if self.upstream.timeout_secs == 0 {
            anyhow::bail!("[upstream] timeout_secs must be greater than zero");
        }

        if self.tls.enabled && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            anyhow::bail!("[tls] requires cert_path and key_path when enabled");
        }

        if self.rules.is_empty() && self.dynamic.is_none() && self.static_caches.is_none() {
            tracing::warn!("No rules, [dynamic] or [static] configured; images are never rewritten");
        }

        Ok(())
    }
}
