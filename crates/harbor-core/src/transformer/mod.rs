//! Image reference transformers
//!
//! A transformer decides whether it applies to an image and, if so, what the
//! image becomes. Transformers are evaluated in order by [`TransformerChain`];
//! the first one that rewrites an image wins.

mod chain;
mod dynamic;
mod rule;
mod static_map;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::platform::Platform;
use crate::reference::ImageReference;

pub use chain::{ImageRewrite, TransformerChain, merge_pull_secrets};
pub use dynamic::DynamicTransformer;
pub use rule::{CompiledRule, RuleTransformer, compile_rules, find_match, metric_label};
pub use static_map::{HarborHealthCheck, StaticTransformer};

/// Result of offering an image to a transformer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The image is rewritten to this reference
    Rewritten(String),
    /// The transformer does not apply to the image
    NoMatch,
    /// The transformer applies but the rewritten image could not be verified
    Unverified,
}

/// Rewrites image references for Harbor proxy-cache projects
#[async_trait]
pub trait ContainerTransformer: Send + Sync {
    fn name(&self) -> &str;

    async fn rewrite(
        &self,
        reference: &ImageReference,
        platform: &Platform,
    ) -> Result<RewriteOutcome, CoreError>;

    /// Pull secret to add to pods whose images this transformer rewrote
    fn pull_secret(&self) -> Option<&str> {
        None
    }

    fn ready(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
