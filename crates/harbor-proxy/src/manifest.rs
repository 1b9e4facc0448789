//! Manifest media types and platform inspection

use bytes::Bytes;
use serde::Deserialize;

use crate::error::ProxyError;

pub const MEDIA_TYPE_DOCKER_SCHEMA1_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_SCHEMA1_SIGNED_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_DOCKER_SCHEMA2_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_SCHEMA2_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Accept header sent on manifest requests; lists come first so registries
/// never down-convert a multi-arch tag to a single manifest
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v1+prettyjws";

/// A manifest document as returned by a registry
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Media type from the document body, falling back to the Content-Type header
    pub media_type: String,
    pub digest: String,
    pub body: Bytes,
}

/// Platform entry of a manifest list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestPlatform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl ManifestPlatform {
    /// `os/arch`, the form platforms are compared in
    pub fn os_arch(&self) -> String {
        format!("{}/{}", self.os, self.architecture)
    }
}

/// What kind of document a manifest is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestKind {
    /// Single-platform image manifest
    Image,
    /// Manifest list / image index with the platforms of its sub-manifests
    Index(Vec<ManifestPlatform>),
    /// Media type we do not recognize
    Unknown(String),
}

#[derive(Deserialize)]
struct SlimManifest {
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
}

#[derive(Deserialize)]
struct SlimIndexEntry {
    #[serde(default)]
    platform: Option<ManifestPlatform>,
}

#[derive(Deserialize)]
struct SlimManifestList {
    #[serde(default)]
    manifests: Vec<SlimIndexEntry>,
}

/// Strip parameters such as `; charset=utf-8` from a Content-Type value
pub fn base_media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

impl Manifest {
    /// Build a manifest from a response body, preferring the `mediaType` field of
    /// the document over the transport Content-Type
    pub fn from_response(body: Bytes, content_type: &str, digest: String) -> Result<Self, ProxyError> {
        let slim: SlimManifest = serde_json::from_slice(&body).map_err(|e| {
            ProxyError::InvalidResponse(format!("failed to parse manifest: {}", e))
        })?;

        let media_type = slim
            .media_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| base_media_type(content_type).to_string());

        Ok(Self {
            media_type,
            digest,
            body,
        })
    }

    /// Classify the manifest, decoding sub-manifest platforms for lists
    pub fn kind(&self) -> Result<ManifestKind, ProxyError> {
        match self.media_type.as_str() {
            MEDIA_TYPE_DOCKER_SCHEMA2_MANIFEST_LIST | MEDIA_TYPE_OCI_IMAGE_INDEX => {
                let list: SlimManifestList = serde_json::from_slice(&self.body).map_err(|e| {
                    ProxyError::InvalidResponse(format!("failed to parse manifest list: {}", e))
                })?;
                Ok(ManifestKind::Index(
                    list.manifests.into_iter().filter_map(|m| m.platform).collect(),
                ))
            }
            MEDIA_TYPE_DOCKER_SCHEMA1_MANIFEST
            | MEDIA_TYPE_DOCKER_SCHEMA1_SIGNED_MANIFEST
            | MEDIA_TYPE_DOCKER_SCHEMA2_MANIFEST
            | MEDIA_TYPE_OCI_IMAGE_MANIFEST => Ok(ManifestKind::Image),
            other => Ok(ManifestKind::Unknown(other.to_string())),
        }
    }
}
