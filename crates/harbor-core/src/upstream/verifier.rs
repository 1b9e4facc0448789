//! Upstream verification of rewritten references

use async_trait::async_trait;
use harbor_auth::Credentials;
use harbor_proxy::{ManifestKind, ManifestPlatform, RegistryClient};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::ImageReference;

/// Confirms that an image reference resolves on its registry
#[async_trait]
pub trait UpstreamVerifier: Send + Sync {
    /// `Ok(false)` when the image exists but does not provide every platform
    async fn verify(
        &self,
        reference: &ImageReference,
        platforms: &[Platform],
        credentials: Option<&Credentials>,
    ) -> Result<bool, CoreError>;
}

/// Verifier backed by the registry v2 manifest API
pub struct RegistryVerifier {
    client: Arc<RegistryClient>,
}

impl RegistryVerifier {
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamVerifier for RegistryVerifier {
    async fn verify(
        &self,
        reference: &ImageReference,
        platforms: &[Platform],
        credentials: Option<&Credentials>,
    ) -> Result<bool, CoreError> {
        let manifest = self
            .client
            .get_manifest(
                reference.registry(),
                reference.repository(),
                reference.manifest_reference(),
                credentials,
            )
            .await?;

        match manifest.kind()? {
            ManifestKind::Image => {
                debug!("{} is a single-platform manifest", reference);
                Ok(true)
            }
            ManifestKind::Index(available) => {
                let provided = provides_platforms(&available, platforms);
                if !provided {
                    debug!(
                        "{} lacks some of {:?}, has {:?}",
                        reference,
                        platforms
                            .iter()
                            .map(Platform::to_string)
                            .collect::<Vec<_>>(),
                        available
                            .iter()
                            .map(ManifestPlatform::os_arch)
                            .collect::<Vec<_>>()
                    );
                }
                Ok(provided)
            }
            ManifestKind::Unknown(media_type) => {
                info!(
                    "Unknown manifest media type {} for {}",
                    media_type, reference
                );
                Ok(true)
            }
        }
    }
}

/// Every required platform must appear among the manifest list entries
pub fn provides_platforms(available: &[ManifestPlatform], required: &[Platform]) -> bool {
    required.iter().all(|platform| {
        available
            .iter()
            .any(|entry| platform.is_provided_by(&entry.os, &entry.architecture))
    })
}
