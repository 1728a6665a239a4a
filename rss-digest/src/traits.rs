use crate::types::{FeedSource, Result};
use async_trait::async_trait;

/// Trait for pulling raw feed documents from a source
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Human-readable name for this transport, used in logs
    fn transport_name(&self) -> String;

    /// Fetch the raw RSS/Atom document for `source`
    async fn pull(&self, source: &FeedSource) -> Result<Vec<u8>>;
}
