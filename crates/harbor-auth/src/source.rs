//! Sources that resolve a secret name into registry credentials

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::AuthError;

/// File name used by `kubernetes.io/dockerconfigjson` secrets
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Resolves pull credentials by secret name
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self, secret_name: &str) -> Result<Credentials, AuthError>;
}

/// Reads docker config secrets mounted as `<root>/<secret>/.dockerconfigjson`
#[derive(Debug, Clone)]
pub struct SecretDirSource {
    root: PathBuf,
}

impl SecretDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn secret_path(&self, secret_name: &str) -> PathBuf {
        self.root.join(secret_name).join(DOCKER_CONFIG_JSON_KEY)
    }
}

#[async_trait]
impl CredentialSource for SecretDirSource {
    async fn credentials(&self, secret_name: &str) -> Result<Credentials, AuthError> {
        // Secret names never contain path separators in Kubernetes
        if secret_name.is_empty() || secret_name.contains('/') || secret_name.contains("..") {
            return Err(AuthError::SecretNotFound(secret_name.to_string()));
        }

        let path = self.secret_path(secret_name);
        debug!("Reading pull secret {} from {}", secret_name, path.display());

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::SecretNotFound(secret_name.to_string()));
            }
            Err(source) => {
                return Err(AuthError::SecretRead {
                    name: secret_name.to_string(),
                    source,
                });
            }
        };

        Credentials::from_docker_config(&data)
    }
}

/// Fixed in-memory credentials, keyed by secret name
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    secrets: HashMap<String, Credentials>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, credentials: Credentials) -> Self {
        self.secrets.insert(name.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticSource {
    async fn credentials(&self, secret_name: &str) -> Result<Credentials, AuthError> {
        self.secrets
            .get(secret_name)
            .cloned()
            .ok_or_else(|| AuthError::SecretNotFound(secret_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_secret(root: &std::path::Path, name: &str, content: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DOCKER_CONFIG_JSON_KEY), content).unwrap();
    }

    #[tokio::test]
    async fn test_secret_dir_source_reads_secret() {
        let tmp = tempfile::tempdir().unwrap();
        write_secret(
            tmp.path(),
            "harbor-pull",
            r#"{"auths":{"harbor.example.com":{"username":"robot","password":"pw"}}}"#,
        );

        let source = SecretDirSource::new(tmp.path());
        let creds = source.credentials("harbor-pull").await.unwrap();
        assert_eq!(creds, Credentials::new("robot", "pw"));
    }

    #[tokio::test]
    async fn test_secret_dir_source_missing_secret() {
        let tmp = tempfile::tempdir().unwrap();
        let source = SecretDirSource::new(tmp.path());

        let err = source.credentials("missing").await.unwrap_err();
        assert!(matches!(err, AuthError::SecretNotFound(_)));

        let err = source.credentials("../etc").await.unwrap_err();
        assert!(matches!(err, AuthError::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn test_secret_dir_source_rejects_multiple_auths() {
        let tmp = tempfile::tempdir().unwrap();
        write_secret(
            tmp.path(),
            "multi",
            r#"{"auths":{"a.io":{"auth":"YTpi"},"b.io":{"auth":"YTpi"}}}"#,
        );

        let source = SecretDirSource::new(tmp.path());
        let err = source.credentials("multi").await.unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedAuthCount(2)));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSource::new().with_secret("a", Credentials::new("u", "p"));
        assert!(source.credentials("a").await.is_ok());
        assert!(source.credentials("b").await.is_err());
    }
}
