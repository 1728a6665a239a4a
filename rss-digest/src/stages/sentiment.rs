use super::{batch_position, Batcher, ProcessingStage, StageContext};
use crate::llm_adapter::{CompletionRequest, ModelClient};
use crate::pacing::BatchOutcome;
use crate::pipeline::RunPhase;
use crate::response::{parse_json_array, ModelResponse};
use crate::types::{Article, Sentiment};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SentimentEntry {
    id: Value,
    #[serde(default)]
    sentiment: Option<String>,
}

/// Labels each summarized article positive, negative or neutral.
pub struct SentimentStage {
    model: Arc<dyn ModelClient>,
    batcher: Batcher,
}

impl SentimentStage {
    pub fn new(model: Arc<dyn ModelClient>, batcher: Batcher) -> Self {
        Self { model, batcher }
    }

    pub async fn classify(&self, mut articles: Vec<Article>) -> Vec<Article> {
        let batch_size = self.batcher.batch_size();
        let total_batches = self.batcher.batch_count(articles.len());
        let mut previous = BatchOutcome::Succeeded;

        for (batch_index, batch) in articles.chunks_mut(batch_size).enumerate() {
            if batch_index > 0 {
                self.batcher.pacing().pause(previous).await;
            }

            let request = CompletionRequest::new(build_prompt(batch))
                .with_temperature(0.0)
                .with_max_tokens(300);

            let mut labels: Vec<Option<Sentiment>> = vec![None; batch.len()];
            previous = match self.model.complete(&request).await {
                Ok(reply) => {
                    match parse_json_array::<SentimentEntry>(&reply) {
                        ModelResponse::Parsed(entries) => {
                            for entry in entries {
                                let Some(position) = batch_position(&entry.id, batch.len()) else {
                                    continue;
                                };
                                if labels[position].is_none() {
                                    labels[position] =
                                        entry.sentiment.as_deref().and_then(Sentiment::from_label);
                                }
                            }
                        }
                        ModelResponse::Unparseable(_) => {
                            warn!(
                                "Sentiment batch {}/{} reply unreadable, defaulting to neutral",
                                batch_index + 1,
                                total_batches
                            );
                        }
                    }
                    BatchOutcome::Succeeded
                }
                Err(e) => {
                    warn!(
                        "Sentiment batch {}/{} failed, defaulting to neutral: {}",
                        batch_index + 1,
                        total_batches,
                        e
                    );
                    BatchOutcome::Failed
                }
            };

            for (article, label) in batch.iter_mut().zip(labels) {
                article.sentiment = Some(label.unwrap_or(Sentiment::Neutral));
            }
            debug!("Sentiment batch {}/{} done", batch_index + 1, total_batches);
        }

        info!("Classified sentiment for {} articles", articles.len());
        articles
    }
}

fn build_prompt(batch: &[Article]) -> String {
    let mut articles_text = String::new();
    for (j, article) in batch.iter().enumerate() {
        let points = article
            .bullets
            .as_deref()
            .map(|bullets| bullets.join("; "))
            .unwrap_or_else(|| article.title.clone());
        let _ = writeln!(articles_text, "[{}] {}", j + 1, points);
    }

    format!(
        r#"Classify the overall sentiment of each news item below as positive, negative or neutral.
Return ONLY a valid JSON array (no extra text):
[{{"id": 1, "sentiment": "positive"}}, {{"id": 2, "sentiment": "neutral"}}, ...]

Items:
{articles_text}"#
    )
}

#[async_trait]
impl ProcessingStage for SentimentStage {
    fn stage_name(&self) -> String {
        "sentiment".to_string()
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Sentiment
    }

    async fn process(&self, articles: Vec<Article>, _context: &StageContext<'_>) -> Vec<Article> {
        self.classify(articles).await
    }
}
