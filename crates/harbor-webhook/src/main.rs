//! Harbor Container Webhook - rewrites pod images to Harbor proxy caches

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod tls;

use config::{Config, LogFormat, LoggingConfig};
use harbor_api::{AppState, WebhookSettings, create_router};
use harbor_auth::{CredentialSource, Credentials, SecretDirSource};
use harbor_core::{
    DynamicTransformer, ProjectsCache, RegistryVerifier, RuleTransformer, StaticTransformer,
    TransformerChain, UpstreamVerifier, compile_rules, spawn_resync_task,
};
use harbor_proxy::{HarborApiClient, HarborApiConfig, RegistryClient, RegistryClientConfig};

/// Harbor Container Webhook - mutating admission webhook for Harbor proxy caches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "HCW_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "HCW_PORT")]
    port: Option<u16>,

    /// Harbor API user for dynamic proxy cache discovery
    #[arg(long, env = "HARBOR_USER")]
    harbor_user: Option<String>,

    /// Harbor API password
    #[arg(long, env = "HARBOR_PASS", hide_env_values = true)]
    harbor_pass: Option<String>,
}

impl Args {
    fn harbor_credentials(&self) -> Option<Credentials> {
        match (&self.harbor_user, &self.harbor_pass) {
            (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Only one of HARBOR_USER and HARBOR_PASS is set, using anonymous Harbor access");
                None
            }
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Harbor Container Webhook v{}", env!("CARGO_PKG_VERSION"));

    // Metrics recorder backing /metrics
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let chain = build_chain(&config, &args)?;
    info!("Transformer chain: {:?}", chain.names());

    // Create application state
    let state = AppState::new(
        Arc::new(chain),
        WebhookSettings {
            default_platform: config.webhook.default_platform.clone(),
            verbose: config.webhook.verbose,
        },
    );

    // Create router
    let app = create_router(state, Some(Arc::new(metrics_handle)))
        .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_addr, port))?;

    // Start server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    match (&config.tls.cert_path, &config.tls.key_path) {
        (Some(cert_path), Some(key_path)) if config.tls.enabled => {
            let acceptor = tls::load_acceptor(cert_path, key_path)?;
            info!("Listening on https://{}", addr);
            tls::serve(listener, acceptor, app, shutdown_signal()).await?;
        }
        _ => {
            info!("Listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Assemble the transformers: rules first, then static caches, then dynamic discovery
fn build_chain(config: &Config, args: &Args) -> Result<TransformerChain> {
    let mut chain = TransformerChain::default();

    let registry = Arc::new(RegistryClient::new(RegistryClientConfig {
        skip_tls_verify: config.upstream.skip_tls_verify,
        timeout: config.upstream.timeout(),
    })?);
    let verifier: Arc<dyn UpstreamVerifier> = Arc::new(RegistryVerifier::new(registry));
    let secrets: Arc<dyn CredentialSource> =
        Arc::new(SecretDirSource::new(&config.webhook.secrets_dir));

    for rule in compile_rules(&config.rules)? {
        info!("Loaded rule {}", rule.name());
        chain.push(Arc::new(
            RuleTransformer::new(rule, verifier.clone())
                .with_credentials(secrets.clone())
                .with_timeout(config.upstream.timeout()),
        ));
    }

    if let Some(static_caches) = &config.static_caches {
        let mut transformer = StaticTransformer::new(static_caches)?;

        if static_caches.verify_harbor_api {
            let endpoint = static_caches
                .harbor_endpoint
                .clone()
                .context("[static] verify_harbor_api requires harbor_endpoint")?;
            let harbor = HarborApiClient::new(HarborApiConfig {
                endpoint,
                credentials: args.harbor_credentials(),
                skip_tls_verify: config.upstream.skip_tls_verify,
                timeout: config.upstream.timeout(),
                page_size: 1,
            })?;
            transformer = transformer.with_health_check(Arc::new(harbor));
        }

        chain.push(Arc::new(transformer));
    }

    if let Some(dynamic) = &config.dynamic {
        let harbor = Arc::new(HarborApiClient::new(HarborApiConfig {
            endpoint: dynamic.harbor_endpoint.clone(),
            credentials: args.harbor_credentials(),
            skip_tls_verify: dynamic.skip_tls_verify,
            timeout: dynamic.timeout(),
            page_size: dynamic.page_size,
        })?);
        let harbor_host = harbor.host();

        info!(
            "Discovering proxy cache projects from {} every {:?}",
            dynamic.harbor_endpoint,
            dynamic.resync_interval()
        );

        // The first tick fetches immediately; /readyz fails until a listing is cached
        let cache = ProjectsCache::new(harbor, dynamic.resync_interval());
        spawn_resync_task(cache.clone(), dynamic.resync_interval());

        chain.push(Arc::new(DynamicTransformer::new(cache, harbor_host)));
    }

    Ok(chain)
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
