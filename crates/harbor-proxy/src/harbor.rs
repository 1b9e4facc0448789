//! Harbor management API client (projects and proxy-cache discovery)

use harbor_auth::Credentials;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::ProxyError;
use crate::link::next_link;

/// Upper bound on followed pages, guards against `Link` loops
const MAX_PAGES: usize = 1000;

/// Harbor API client configuration
#[derive(Clone, Debug)]
pub struct HarborApiConfig {
    /// Base URL of the Harbor instance, e.g. `https://harbor.example.com`
    pub endpoint: String,
    /// Basic auth credentials (`HARBOR_USER` / `HARBOR_PASS`)
    pub credentials: Option<Credentials>,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Page size used when listing projects
    pub page_size: usize,
}

/// A Harbor project as returned by `GET /api/v2.0/projects`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
}

/// Upstream registry a proxy-cache project mirrors
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistrySummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Subset of `GET /api/v2.0/projects/{id}/summary`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectSummary {
    #[serde(default)]
    pub registry: Option<RegistrySummary>,
}

/// Harbor API client
pub struct HarborApiClient {
    config: HarborApiConfig,
    base: Url,
    client: Client,
}

impl HarborApiClient {
    /// Create a new Harbor API client
    pub fn new(config: HarborApiConfig) -> Result<Self, ProxyError> {
        let base = Url::parse(config.endpoint.trim_end_matches('/'))
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", config.endpoint, e)))?;

        let mut builder = Client::builder().timeout(config.timeout);

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!("Created Harbor API client for {}", base);

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Host (and port) of the Harbor endpoint, used as the rewrite target
    pub fn host(&self) -> String {
        match (self.base.host_str(), self.base.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        }
    }

    fn api_url(&self, path: &str) -> Result<Url, ProxyError> {
        self.base
            .join(path)
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<(T, Option<String>), ProxyError> {
        debug!("GET {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(creds) = &self.config.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProxyError::Unauthorized);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(url.to_string()));
        }

        if !status.is_success() {
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let next = next_link(response.headers());
        let body = response.bytes().await?;
        let value = serde_json::from_slice(&body).map_err(|e| {
            ProxyError::InvalidResponse(format!("failed to decode response from {}: {}", url, e))
        })?;

        Ok((value, next))
    }

    /// List every project, following `Link: <...>; rel="next"` pagination
    pub async fn list_projects(&self) -> Result<Vec<Project>, ProxyError> {
        let mut url = self.api_url("/api/v2.0/projects")?;
        url.query_pairs_mut()
            .append_pair("page", "1")
            .append_pair("page_size", &self.config.page_size.to_string());

        let mut projects = Vec::new();

        for _ in 0..MAX_PAGES {
            let (page, next): (Vec<Project>, _) = self.get(url.clone()).await?;
            projects.extend(page);

            let Some(next) = next else {
                debug!("Listed {} projects from {}", projects.len(), self.base);
                return Ok(projects);
            };

            // Harbor returns path-relative links
            url = url
                .join(&next)
                .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", next, e)))?;
        }

        Err(ProxyError::InvalidResponse(format!(
            "project listing exceeded {} pages",
            MAX_PAGES
        )))
    }

    /// Fetch the summary of a project, which carries its proxy-cache registry
    pub async fn project_summary(&self, project_id: i64) -> Result<ProjectSummary, ProxyError> {
        let url = self.api_url(&format!("/api/v2.0/projects/{}/summary", project_id))?;
        let (summary, _) = self.get(url).await?;
        Ok(summary)
    }

    /// Check that the Harbor API answers
    pub async fn ping(&self) -> Result<bool, ProxyError> {
        let url = self.api_url("/api/v2.0/ping")?;
        let response = self.client.get(url).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(endpoint: String) -> HarborApiClient {
        HarborApiClient::new(HarborApiConfig {
            endpoint,
            credentials: Some(Credentials::new("admin", "Harbor12345")),
            skip_tls_verify: false,
            timeout: Duration::from_secs(5),
            page_size: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_host() {
        let c = client("https://harbor.example.com/".to_string());
        assert_eq!(c.host(), "harbor.example.com");

        let c = client("http://harbor.local:8080".to_string());
        assert_eq!(c.host(), "harbor.local:8080");
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = HarborApiClient::new(HarborApiConfig {
            endpoint: "not a url".to_string(),
            credentials: None,
            skip_tls_verify: false,
            timeout: Duration::from_secs(5),
            page_size: 20,
        });
        assert!(matches!(result, Err(ProxyError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_list_projects_follows_pagination() {
        let mut server = mockito::Server::new_async().await;

        let page1 = server
            .mock("GET", "/api/v2.0/projects")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("page_size".into(), "2".into()),
            ]))
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_header("link", r#"</api/v2.0/projects?page=2&page_size=2>; rel="next""#)
            .with_body(r#"[{"project_id":1,"name":"library"},{"project_id":2,"name":"dockerhub-proxy"}]"#)
            .create_async()
            .await;

        let page2 = server
            .mock("GET", "/api/v2.0/projects")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("page_size".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header(
                "link",
                r#"</api/v2.0/projects?page=1&page_size=2>; rel="prev""#,
            )
            .with_body(r#"[{"project_id":3,"name":"quay-proxy","registry_id":2}]"#)
            .create_async()
            .await;

        let projects = client(server.url()).list_projects().await.unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["library", "dockerhub-proxy", "quay-proxy"]);

        page1.assert_async().await;
        page2.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_projects_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2.0/projects")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client(server.url()).list_projects().await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_project_summary() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2.0/projects/2/summary")
            .with_status(200)
            .with_body(
                r#"{"repo_count":4,"registry":{"id":1,"name":"dockerhub","url":"https://registry.hub.docker.com","type":"docker-hub"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/v2.0/projects/1/summary")
            .with_status(200)
            .with_body(r#"{"repo_count":0}"#)
            .create_async()
            .await;

        let c = client(server.url());

        let summary = c.project_summary(2).await.unwrap();
        let registry = summary.registry.unwrap();
        assert_eq!(registry.name, "dockerhub");
        assert_eq!(registry.url, "https://registry.hub.docker.com");

        assert!(c.project_summary(1).await.unwrap().registry.is_none());
    }
}
