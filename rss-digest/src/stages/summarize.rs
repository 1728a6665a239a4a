use super::{Batcher, ProcessingStage, StageContext};
use crate::llm_adapter::{CompletionRequest, ModelClient};
use crate::pacing::BatchOutcome;
use crate::pipeline::RunPhase;
use crate::response::split_index_sections;
use crate::types::Article;
use crate::utils::text::truncate_chars;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_BULLETS: usize = 3;
pub const DEFAULT_FALLBACK_CHARS: usize = 500;
const PROMPT_CONTENT_CHARS: usize = 400;
const BULLET_GLYPHS: &[char] = &['•', '-', '*', '–'];

/// Turns each article into a short list of key-point bullets. Never drops
/// an article: anything the model does not cover gets a fallback bullet.
pub struct SummarizationStage {
    model: Arc<dyn ModelClient>,
    batcher: Batcher,
    fallback_chars: usize,
}

impl SummarizationStage {
    pub fn new(model: Arc<dyn ModelClient>, batcher: Batcher) -> Self {
        Self {
            model,
            batcher,
            fallback_chars: DEFAULT_FALLBACK_CHARS,
        }
    }

    /// Bound on a fallback bullet. Excerpts longer than this are cut, so it
    /// should be at least the longest excerpt the stage can receive.
    pub fn with_fallback_chars(mut self, fallback_chars: usize) -> Self {
        self.fallback_chars = fallback_chars;
        self
    }

    pub async fn summarize(&self, mut articles: Vec<Article>) -> Vec<Article> {
        let batch_size = self.batcher.batch_size();
        let total_batches = self.batcher.batch_count(articles.len());
        let mut previous = BatchOutcome::Succeeded;
        let mut fallbacks = 0usize;

        for (batch_index, batch) in articles.chunks_mut(batch_size).enumerate() {
            if batch_index > 0 {
                self.batcher.pacing().pause(previous).await;
            }

            let request = CompletionRequest::new(build_prompt(batch))
                .with_temperature(0.3)
                .with_max_tokens(1500);

            let sections = match self.model.complete(&request).await {
                Ok(reply) => {
                    previous = BatchOutcome::Succeeded;
                    split_index_sections(&reply)
                }
                Err(e) => {
                    warn!(
                        "Summary batch {}/{} failed, using excerpts: {}",
                        batch_index + 1,
                        total_batches,
                        e
                    );
                    previous = BatchOutcome::Failed;
                    BTreeMap::new()
                }
            };

            for (j, article) in batch.iter_mut().enumerate() {
                let bullets = sections
                    .get(&(j + 1))
                    .map(|block| parse_bullets(block))
                    .filter(|bullets| !bullets.is_empty());
                let bullets = match bullets {
                    Some(bullets) => bullets,
                    None => {
                        fallbacks += 1;
                        vec![self.fallback_bullet(article)]
                    }
                };
                article.bullets = Some(bullets);
            }
            debug!("Summary batch {}/{} done", batch_index + 1, total_batches);
        }

        info!(
            "Summarized {} articles ({} fallbacks)",
            articles.len(),
            fallbacks
        );
        articles
    }

    fn fallback_bullet(&self, article: &Article) -> String {
        let summary = article.summary.trim();
        let text = if summary.is_empty() {
            article.title.trim()
        } else {
            summary
        };
        truncate_chars(text, self.fallback_chars).to_string()
    }
}

/// Lines of a `[n]` block with leading bullet glyphs removed.
pub fn parse_bullets(block: &str) -> Vec<String> {
    block
        .lines()
        .map(|line| line.trim().trim_start_matches(BULLET_GLYPHS).trim())
        .filter(|line| !line.is_empty())
        .take(MAX_BULLETS)
        .map(str::to_string)
        .collect()
}

fn build_prompt(batch: &[Article]) -> String {
    let mut articles_text = String::new();
    for (j, article) in batch.iter().enumerate() {
        let _ = write!(
            articles_text,
            "[{}] Title: {}\nContent: {}\n\n",
            j + 1,
            article.title,
            truncate_chars(&article.summary, PROMPT_CONTENT_CHARS)
        );
    }

    format!(
        r#"Summarize each article below in exactly 3 concise bullet points.
Focus on the key finding, method or business impact.

Return in this exact format:
[1]
• point one
• point two
• point three
[2]
• point one
...

Articles:
{articles_text}"#
    )
}

#[async_trait]
impl ProcessingStage for SummarizationStage {
    fn stage_name(&self) -> String {
        "summarizer".to_string()
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Summarizing
    }

    async fn process(&self, articles: Vec<Article>, _context: &StageContext<'_>) -> Vec<Article> {
        self.summarize(articles).await
    }
}
