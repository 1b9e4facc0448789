//! Ordered evaluation of transformers

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ContainerTransformer, RewriteOutcome};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::ImageReference;

/// What the chain decided for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRewrite {
    /// The rewritten image, or the original when nothing applied
    pub image: String,
    /// Name of the transformer that rewrote the image
    pub transformer: Option<String>,
    /// Pull secret the pod needs for the rewritten image
    pub pull_secret: Option<String>,
}

impl ImageRewrite {
    fn unchanged(image: &str) -> Self {
        Self {
            image: image.to_string(),
            transformer: None,
            pull_secret: None,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        self.transformer.is_some()
    }
}

/// Transformers in configured order
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn ContainerTransformer>>,
}

impl TransformerChain {
    pub fn new(transformers: Vec<Arc<dyn ContainerTransformer>>) -> Self {
        Self { transformers }
    }

    pub fn push(&mut self, transformer: Arc<dyn ContainerTransformer>) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Offer the image to each transformer in turn; the first rewrite wins
    ///
    /// Only a malformed image is an error. A transformer that fails for any
    /// other reason is skipped like one whose rewrite could not be verified.
    pub async fn rewrite(
        &self,
        image: &str,
        platform: &Platform,
    ) -> Result<ImageRewrite, CoreError> {
        let reference = ImageReference::parse(image)?;

        for transformer in &self.transformers {
            match transformer.rewrite(&reference, platform).await {
                Ok(RewriteOutcome::Rewritten(rewritten)) => {
                    return Ok(ImageRewrite {
                        image: rewritten,
                        transformer: Some(transformer.name().to_string()),
                        pull_secret: transformer.pull_secret().map(str::to_string),
                    });
                }
                Ok(RewriteOutcome::NoMatch) => {}
                Ok(RewriteOutcome::Unverified) => {
                    debug!(
                        "{} could not verify a rewrite of {}, trying the next transformer",
                        transformer.name(),
                        image
                    );
                }
                Err(e @ CoreError::InvalidReference { .. }) => return Err(e),
                Err(e) => {
                    warn!("{} failed to rewrite {}: {}", transformer.name(), image, e);
                }
            }
        }

        debug!("No transformer rewrote {}, keeping it", image);
        Ok(ImageRewrite::unchanged(image))
    }

    /// Rewritten image, or the original when nothing applied
    pub async fn rewrite_image(
        &self,
        image: &str,
        platform: &Platform,
    ) -> Result<String, CoreError> {
        Ok(self.rewrite(image, platform).await?.image)
    }

    /// Ready once every transformer is
    pub fn ready(&self) -> Result<(), CoreError> {
        for transformer in &self.transformers {
            if let Err(e) = transformer.ready() {
                info!("Transformer {} is not ready: {}", transformer.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Append secrets that are not present yet, keeping the existing order
pub fn merge_pull_secrets<'a>(
    existing: &[String],
    additions: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut merged = existing.to_vec();
    for secret in additions {
        if !merged.iter().any(|s| s == secret) {
            merged.push(secret.to_string());
        }
    }
    merged
}
