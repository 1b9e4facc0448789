//! Container image reference parsing and normalization
//!
//! Follows the Docker reference grammar: an optional registry host, a
//! lowercase repository path and an optional tag and/or digest. Docker Hub
//! conventions are applied on parse: references without a registry resolve
//! to `docker.io`, and single-segment Docker Hub repositories live under the
//! `library/` namespace.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::CoreError;

/// Registry assumed when a reference names no host
pub const BARE_REGISTRY: &str = "docker.io";

/// Tag assumed when a reference names neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Namespace of Docker Hub official images
const LIBRARY_NAMESPACE: &str = "library";

/// Legacy Docker Hub host, normalized to [`BARE_REGISTRY`]
const LEGACY_DOCKER_HUB: &str = "index.docker.io";

const MAX_NAME_LENGTH: usize = 255;

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid path component regex")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"));

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("valid digest regex")
});

static HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*|\[[0-9a-fA-F:]+\])(?::[0-9]+)?$",
    )
    .expect("valid host regex")
});

/// Tag or digest part of a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagOrDigest {
    Tag(String),
    Digest(String),
}

impl fmt::Display for TagOrDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagOrDigest::Tag(tag) => write!(f, ":{}", tag),
            TagOrDigest::Digest(digest) => write!(f, "@{}", digest),
        }
    }
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    /// `None` means the implicit `latest` tag
    tag_or_digest: Option<TagOrDigest>,
}

impl ImageReference {
    /// Parse a raw image reference such as `ubuntu`, `quay.io/org/app:v1` or
    /// `localhost:5000/app@sha256:...`
    ///
    /// When both a tag and a digest are present the digest identifies the
    /// image and the tag is dropped.
    pub fn parse(reference: &str) -> Result<Self, CoreError> {
        if reference.is_empty() {
            return Err(CoreError::invalid_reference(reference, "empty reference"));
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(CoreError::invalid_reference(reference, "invalid digest"));
                }
                (name, Some(digest))
            }
            None => (reference, None),
        };

        // a tag colon only counts after the last slash, otherwise it is a port
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let tag = &name[last_slash + i + 1..];
                if !TAG.is_match(tag) {
                    return Err(CoreError::invalid_reference(reference, "invalid tag"));
                }
                (&name[..last_slash + i], Some(tag))
            }
            None => (name, None),
        };

        if name.len() > MAX_NAME_LENGTH {
            return Err(CoreError::invalid_reference(
                reference,
                "repository name too long",
            ));
        }

        let (registry, path) = split_registry(name);

        if !HOST.is_match(registry) {
            return Err(CoreError::invalid_reference(
                reference,
                "invalid registry host",
            ));
        }

        if path.is_empty() || !path.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(CoreError::invalid_reference(
                reference,
                "repository path must be lowercase alphanumeric components",
            ));
        }

        let repository = if registry == BARE_REGISTRY && !path.contains('/') {
            format!("{}/{}", LIBRARY_NAMESPACE, path)
        } else {
            path.to_string()
        };

        let tag_or_digest = match (digest, tag) {
            (Some(digest), _) => Some(TagOrDigest::Digest(digest.to_string())),
            (None, Some(tag)) => Some(TagOrDigest::Tag(tag.to_string())),
            (None, None) => None,
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            tag_or_digest,
        })
    }

    /// Registry host, including the port when one was given
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path, `library/` expanded for Docker Hub official images
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag_or_digest(&self) -> Option<&TagOrDigest> {
        self.tag_or_digest.as_ref()
    }

    /// Tag, digest or `latest`, the form used in `/v2/<name>/manifests/<reference>`
    pub fn manifest_reference(&self) -> &str {
        match &self.tag_or_digest {
            Some(TagOrDigest::Tag(tag)) => tag,
            Some(TagOrDigest::Digest(digest)) => digest,
            None => DEFAULT_TAG,
        }
    }

    fn explicit_tag_or_digest(&self) -> TagOrDigest {
        self.tag_or_digest
            .clone()
            .unwrap_or_else(|| TagOrDigest::Tag(DEFAULT_TAG.to_string()))
    }

    /// Fully qualified form with an explicit tag, e.g. `docker.io/library/ubuntu:latest`
    ///
    /// Rule patterns are evaluated against this string.
    pub fn normalized(&self) -> String {
        reconstruct(
            &self.registry,
            &self.repository,
            Some(&self.explicit_tag_or_digest()),
        )
    }

    /// Fully qualified form with the registry swapped for `replacement`, which
    /// may carry a path prefix such as `harbor.example.com/dockerhub-proxy`
    pub fn with_registry(&self, replacement: &str) -> String {
        reconstruct(
            replacement.trim_end_matches('/'),
            &self.repository,
            Some(&self.explicit_tag_or_digest()),
        )
    }
}

/// Inverse of [`ImageReference::parse`]
pub fn reconstruct(
    registry: &str,
    repository: &str,
    tag_or_digest: Option<&TagOrDigest>,
) -> String {
    match tag_or_digest {
        Some(suffix) => format!("{}/{}{}", registry, repository, suffix),
        None => format!("{}/{}", registry, repository),
    }
}

/// Split the registry host off a name; the first segment is a host only when it
/// looks like one
fn split_registry(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((LEGACY_DOCKER_HUB, rest)) => (BARE_REGISTRY, rest),
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first, rest)
        }
        _ => (BARE_REGISTRY, name),
    }
}

impl FromStr for ImageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&reconstruct(
            &self.registry,
            &self.repository,
            self.tag_or_digest.as_ref(),
        ))
    }
}
