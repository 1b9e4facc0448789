//! Registry credentials and Docker client config parsing

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AuthError;

/// Username/password pair used for registry basic auth and token requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Docker client config (`.dockerconfigjson`)
#[derive(Debug, Deserialize)]
pub struct DockerConfigJson {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuthEntry>,
}

/// A single entry under `auths`
#[derive(Debug, Default, Deserialize)]
pub struct DockerAuthEntry {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// base64 encoded `user:pass`
    #[serde(default)]
    pub auth: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse credentials out of a Docker client config.
    ///
    /// Exactly one entry must be present under `auths`. The `auth` field wins
    /// over `username`/`password` when both are set.
    pub fn from_docker_config(data: &[u8]) -> Result<Self, AuthError> {
        let config: DockerConfigJson = serde_json::from_slice(data)?;

        if config.auths.len() != 1 {
            return Err(AuthError::UnsupportedAuthCount(config.auths.len()));
        }

        let Some((registry, entry)) = config.auths.into_iter().next() else {
            return Err(AuthError::UnsupportedAuthCount(0));
        };

        if !entry.auth.is_empty() {
            return decode_auth_field(&entry.auth)
                .ok_or(AuthError::InvalidAuthField(registry));
        }

        Ok(Self::new(entry.username, entry.password))
    }
}

/// Decode a docker config `auth` field (base64 `user:pass`)
fn decode_auth_field(auth: &str) -> Option<Credentials> {
    let decoded = STANDARD.decode(auth.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials::new(username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_password_entry() {
        let data = br#"{"auths":{"harbor.example.com":{"username":"robot","password":"s3cret"}}}"#;
        let creds = Credentials::from_docker_config(data).unwrap();
        assert_eq!(creds, Credentials::new("robot", "s3cret"));
    }

    #[test]
    fn test_auth_field_entry() {
        let auth = STANDARD.encode("robot$ci:p:ss");
        let data = format!(
            r#"{{"auths":{{"harbor.example.com":{{"auth":"{}","username":"ignored"}}}}}}"#,
            auth
        );
        let creds = Credentials::from_docker_config(data.as_bytes()).unwrap();
        assert_eq!(creds.username, "robot$ci");
        assert_eq!(creds.password, "p:ss");
    }

    #[test]
    fn test_multiple_entries_rejected() {
        let data = br#"{"auths":{"a.example.com":{"auth":"YTpi"},"b.example.com":{"auth":"YTpi"}}}"#;
        let err = Credentials::from_docker_config(data).unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedAuthCount(2)));
    }

    #[test]
    fn test_empty_auths_rejected() {
        let err = Credentials::from_docker_config(br#"{"auths":{}}"#).unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedAuthCount(0)));
    }

    #[test]
    fn test_malformed_auth_field() {
        let data = br#"{"auths":{"harbor.example.com":{"auth":"bm9jb2xvbg=="}}}"#;
        let err = Credentials::from_docker_config(data).unwrap_err();
        assert!(matches!(err, AuthError::InvalidAuthField(ref r) if r == "harbor.example.com"));
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("robot", "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }
}
