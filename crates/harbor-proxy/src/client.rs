//! OCI distribution client used to inspect manifests on proxy-cache registries

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use harbor_auth::Credentials;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::manifest::{MANIFEST_ACCEPT, Manifest};

/// Registry client configuration
#[derive(Clone, Debug)]
pub struct RegistryClientConfig {
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            skip_tls_verify: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Token response from a registry token service
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, PartialEq, Eq)]
enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

/// Upper bound on cached authorization headers; the cache is reset when reached
const MAX_CACHED_TOKENS: usize = 1024;

/// Registry v2 client
///
/// Authorization headers are cached per `registry/repository` and user, and
/// re-negotiated whenever the registry answers 401.
pub struct RegistryClient {
    client: Client,
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(config: RegistryClientConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!(
            "Created registry client (skip_tls_verify: {}, timeout: {:?})",
            config.skip_tls_verify, config.timeout
        );

        Ok(Self {
            client,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Base URL for a registry host; loopback registries are spoken to over plain HTTP
    pub fn base_url(registry: &str) -> String {
        let host = registry
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(host, _)| host)
            .unwrap_or(registry);

        let scheme = match host {
            "localhost" | "127.0.0.1" | "[::1]" | "::1" => "http",
            _ => "https",
        };
        format!("{}://{}", scheme, registry)
    }

    /// Fetch a manifest by tag or digest
    pub async fn get_manifest(
        &self,
        registry: &str,
        repository: &str,
        reference: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Manifest, ProxyError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            Self::base_url(registry),
            repository,
            reference
        );
        let cache_key = token_key(registry, repository, credentials);

        debug!("Fetching manifest: {}", url);

        let cached = self.tokens.read().await.get(&cache_key).cloned();
        let response = self.send_manifest_request(&url, cached.as_deref()).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Registry {} requires authorization, negotiating", registry);
            self.tokens.write().await.remove(&cache_key);

            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .and_then(parse_challenge)
                .ok_or(ProxyError::Unauthorized)?;

            let auth = self.authorize(&challenge, credentials).await?;
            let retry = self.send_manifest_request(&url, Some(&auth)).await?;

            if retry.status().is_success() {
                let mut tokens = self.tokens.write().await;
                if tokens.len() >= MAX_CACHED_TOKENS {
                    debug!("Token cache full, clearing {} entries", tokens.len());
                    tokens.clear();
                }
                tokens.insert(cache_key, auth);
            }
            retry
        } else {
            response
        };

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProxyError::Unauthorized);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(format!(
                "{}/{}:{}",
                registry, repository, reference
            )));
        }

        if !status.is_success() {
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.bytes().await?;

        Manifest::from_response(body, &content_type, digest)
    }

    async fn send_manifest_request(
        &self,
        url: &str,
        auth: Option<&str>,
    ) -> Result<Response, ProxyError> {
        let mut request = self.client.get(url).header(ACCEPT, MANIFEST_ACCEPT);

        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }

        Ok(request.send().await?)
    }

    /// Answer an authentication challenge, producing an Authorization header value
    async fn authorize(
        &self,
        challenge: &Challenge,
        credentials: Option<&Credentials>,
    ) -> Result<String, ProxyError> {
        match challenge {
            Challenge::Basic => credentials
                .map(basic_auth_header)
                .ok_or(ProxyError::Unauthorized),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let mut params = vec![];
                if let Some(svc) = service {
                    params.push(("service", svc.as_str()));
                }
                if let Some(scp) = scope {
                    params.push(("scope", scp.as_str()));
                }

                debug!("Fetching token from: {}", realm);

                let mut request = self.client.get(realm).query(&params);

                if let Some(creds) = credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }

                let response = request.send().await?;

                if !response.status().is_success() {
                    debug!("Token request failed with status {}", response.status());
                    return Err(ProxyError::TokenRefreshFailed);
                }

                let token_response: TokenResponse = response.json().await?;
                let token = token_response
                    .token
                    .or(token_response.access_token)
                    .filter(|t| !t.is_empty())
                    .ok_or(ProxyError::TokenRefreshFailed)?;

                Ok(format!("Bearer {}", token))
            }
        }
    }
}

/// Tokens are scoped to a repository and to the user that obtained them
fn token_key(registry: &str, repository: &str, credentials: Option<&Credentials>) -> String {
    format!(
        "{}/{}#{}",
        registry,
        repository,
        credentials.map(|c| c.username.as_str()).unwrap_or_default()
    )
}

fn basic_auth_header(credentials: &Credentials) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", credentials.username, credentials.password))
    )
}

/// Parse `Bearer realm="...",service="...",scope="..."` or `Basic realm="..."`
fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    for (key, value) in split_params(rest) {
        match key.as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    Some(Challenge::Bearer {
        realm: realm?,
        service,
        scope,
    })
}

/// Split comma separated `key="value"` pairs; commas inside quotes belong to the value
/// (scopes like `repository:a/b:pull,push`)
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars().chain(std::iter::once(',')) {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                if let Some((key, value)) = current.split_once('=') {
                    pairs.push((
                        key.trim().to_ascii_lowercase(),
                        value.trim().trim_matches('"').to_string(),
                    ));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const IMAGE_MANIFEST: &str = r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{},"layers":[]}"#;

    fn client() -> RegistryClient {
        RegistryClient::new(RegistryClientConfig::default()).unwrap()
    }

    #[test]
    fn test_base_url() {
        assert_eq!(RegistryClient::base_url("harbor.example.com"), "https://harbor.example.com");
        assert_eq!(RegistryClient::base_url("localhost:5000"), "http://localhost:5000");
        assert_eq!(RegistryClient::base_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(RegistryClient::base_url("registry:5000"), "https://registry:5000");
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let header = r#"Bearer realm="https://harbor.example.com/service/token",service="harbor-registry",scope="repository:proxy/library/nginx:pull,push""#;
        assert_eq!(
            parse_challenge(header),
            Some(Challenge::Bearer {
                realm: "https://harbor.example.com/service/token".to_string(),
                service: Some("harbor-registry".to_string()),
                scope: Some("repository:proxy/library/nginx:pull,push".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_basic_and_unknown_challenge() {
        assert_eq!(parse_challenge(r#"Basic realm="harbor""#), Some(Challenge::Basic));
        assert_eq!(parse_challenge("Negotiate abc"), None);
        assert_eq!(parse_challenge(r#"Bearer service="x""#), None);
    }

    #[tokio::test]
    async fn test_get_manifest_anonymous() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/proxy/library/nginx/manifests/latest")
            .with_status(200)
            .with_header("content-type", "application/vnd.docker.distribution.manifest.v2+json")
            .with_header("docker-content-digest", "sha256:abc")
            .with_body(IMAGE_MANIFEST)
            .create_async()
            .await;

        let manifest = client()
            .get_manifest(&server.host_with_port(), "proxy/library/nginx", "latest", None)
            .await
            .unwrap();

        assert_eq!(manifest.digest, "sha256:abc");
        assert_eq!(
            manifest.media_type,
            "application/vnd.docker.distribution.manifest.v2+json"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_manifest_bearer_token_flow() {
        let mut server = mockito::Server::new_async().await;
        let challenge = format!(
            r#"Bearer realm="{}/service/token",service="harbor-registry",scope="repository:proxy/nginx:pull""#,
            server.url()
        );

        let unauthorized = server
            .mock("GET", "/v2/proxy/nginx/manifests/1.25")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header("www-authenticate", &challenge)
            .create_async()
            .await;

        let token = server
            .mock("GET", "/service/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("service".into(), "harbor-registry".into()),
                Matcher::UrlEncoded("scope".into(), "repository:proxy/nginx:pull".into()),
            ]))
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_body(r#"{"token":"t0ken"}"#)
            .create_async()
            .await;

        let authorized = server
            .mock("GET", "/v2/proxy/nginx/manifests/1.25")
            .match_header("authorization", "Bearer t0ken")
            .with_status(200)
            .with_body(IMAGE_MANIFEST)
            .expect(2)
            .create_async()
            .await;

        let client = client();
        let creds = Credentials::new("robot", "secret");
        let registry = server.host_with_port();

        client
            .get_manifest(&registry, "proxy/nginx", "1.25", Some(&creds))
            .await
            .unwrap();
        // second call reuses the cached token
        client
            .get_manifest(&registry, "proxy/nginx", "1.25", Some(&creds))
            .await
            .unwrap();

        unauthorized.assert_async().await;
        token.assert_async().await;
        authorized.assert_async().await;
    }

    #[test]
    fn test_token_key_includes_user() {
        let robot = Credentials::new("robot", "secret");
        let other = Credentials::new("other", "secret");

        assert_ne!(
            token_key("harbor.example.com", "proxy/nginx", Some(&robot)),
            token_key("harbor.example.com", "proxy/nginx", Some(&other))
        );
        assert_ne!(
            token_key("harbor.example.com", "proxy/nginx", Some(&robot)),
            token_key("harbor.example.com", "proxy/nginx", None)
        );
    }

    #[tokio::test]
    async fn test_tokens_not_shared_between_users() {
        let mut server = mockito::Server::new_async().await;
        let challenge = format!(
            r#"Bearer realm="{}/service/token",service="harbor-registry",scope="repository:proxy/nginx:pull""#,
            server.url()
        );

        let unauthorized = server
            .mock("GET", "/v2/proxy/nginx/manifests/1.25")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .with_header("www-authenticate", &challenge)
            .expect(2)
            .create_async()
            .await;

        let token = server
            .mock("GET", "/service/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"token":"t0ken"}"#)
            .expect(2)
            .create_async()
            .await;

        let authorized = server
            .mock("GET", "/v2/proxy/nginx/manifests/1.25")
            .match_header("authorization", "Bearer t0ken")
            .with_status(200)
            .with_body(IMAGE_MANIFEST)
            .expect(2)
            .create_async()
            .await;

        let client = client();
        let registry = server.host_with_port();

        for user in ["robot", "other"] {
            client
                .get_manifest(&registry, "proxy/nginx", "1.25", Some(&Credentials::new(user, "secret")))
                .await
                .unwrap();
        }

        unauthorized.assert_async().await;
        token.assert_async().await;
        authorized.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_manifest_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/proxy/missing/manifests/latest")
            .with_status(404)
            .create_async()
            .await;

        let err = client()
            .get_manifest(&server.host_with_port(), "proxy/missing", "latest", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_manifest_basic_challenge_without_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/proxy/nginx/manifests/latest")
            .with_status(401)
            .with_header("www-authenticate", r#"Basic realm="harbor""#)
            .create_async()
            .await;

        let err = client()
            .get_manifest(&server.host_with_port(), "proxy/nginx", "latest", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unauthorized));
    }

    #[tokio::test]
    async fn test_get_manifest_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/proxy/nginx/manifests/latest")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = client()
            .get_manifest(&server.host_with_port(), "proxy/nginx", "latest", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamError { status: 503, .. }));
    }
}
