pub mod enrich;
pub mod relevance;
pub mod sentiment;
pub mod summarize;

pub use enrich::{EnrichStage, HttpPageFetcher, PageFetcher};
pub use relevance::RelevanceStage;
pub use sentiment::SentimentStage;
pub use summarize::SummarizationStage;

use crate::pacing::PacingPolicy;
use crate::pipeline::RunPhase;
use crate::types::{Article, TopicGroup};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// What a stage knows about the group it is running for.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub group: &'a TopicGroup,
}

/// One step of a group's chain. Stages never fail: each one degrades
/// individual articles or batches according to its own fallback.
#[async_trait]
pub trait ProcessingStage: Send + Sync {
    /// Get the name of this processing stage
    fn stage_name(&self) -> String;

    /// Phase reported while this stage runs
    fn phase(&self) -> RunPhase;

    async fn process(&self, articles: Vec<Article>, context: &StageContext<'_>) -> Vec<Article>;
}

/// Fixed-size batching plus the pacing applied between consecutive calls.
#[derive(Clone)]
pub struct Batcher {
    batch_size: usize,
    pacing: Arc<dyn PacingPolicy>,
}

impl Batcher {
    pub fn new(batch_size: usize, pacing: Arc<dyn PacingPolicy>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pacing,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pacing(&self) -> &dyn PacingPolicy {
        self.pacing.as_ref()
    }

    pub fn batch_count(&self, items: usize) -> usize {
        items.div_ceil(self.batch_size)
    }
}

/// Models are inconsistent about numbers: accept `3`, `3.0` and `"3"`.
pub(crate) fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve a 1-based id from a model reply into a 0-based batch position.
pub(crate) fn batch_position(id: &Value, batch_len: usize) -> Option<usize> {
    let id = loose_int(id)?;
    if id >= 1 && (id as usize) <= batch_len {
        Some(id as usize - 1)
    } else {
        None
    }
}
