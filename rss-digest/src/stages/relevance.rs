use super::{batch_position, loose_int, Batcher, ProcessingStage, StageContext};
use crate::llm_adapter::{CompletionRequest, ModelClient};
use crate::pacing::BatchOutcome;
use crate::pipeline::RunPhase;
use crate::response::{parse_json_array, ModelResponse};
use crate::types::Article;
use crate::utils::text::truncate_chars;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_THRESHOLD: u8 = 7;
pub const DEFAULT_MAX_ARTICLES: usize = 12;
const PROMPT_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    score: Value,
}

/// Scores articles against a group's topics and keeps the best ones.
pub struct RelevanceStage {
    model: Arc<dyn ModelClient>,
    batcher: Batcher,
    threshold: u8,
    max_articles: usize,
}

impl RelevanceStage {
    pub fn new(model: Arc<dyn ModelClient>, batcher: Batcher) -> Self {
        Self {
            model,
            batcher,
            threshold: DEFAULT_THRESHOLD,
            max_articles: DEFAULT_MAX_ARTICLES,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles;
        self
    }

    /// Score `articles` in batches and return the accepted ones, best first.
    /// Equal scores keep fetch order. A batch whose call fails or whose
    /// reply cannot be read contributes nothing.
    pub async fn filter(&self, articles: Vec<Article>, topics: &[String]) -> Vec<Article> {
        if articles.is_empty() {
            return Vec::new();
        }

        let batch_size = self.batcher.batch_size();
        let total_batches = self.batcher.batch_count(articles.len());
        let mut accepted: Vec<(usize, Article)> = Vec::new();
        let mut previous = BatchOutcome::Succeeded;

        for (batch_index, batch) in articles.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.batcher.pacing().pause(previous).await;
            }

            let request = CompletionRequest::new(build_prompt(topics, batch))
                .with_temperature(0.0)
                .with_max_tokens(300);

            let scores = match self.model.complete(&request).await {
                Ok(reply) => match parse_json_array::<ScoreEntry>(&reply) {
                    ModelResponse::Parsed(entries) => Some(entries),
                    ModelResponse::Unparseable(raw) => {
                        warn!(
                            "Filter batch {}/{} reply unreadable, dropping {} articles: {}",
                            batch_index + 1,
                            total_batches,
                            batch.len(),
                            truncate_chars(&raw, 120)
                        );
                        None
                    }
                },
                Err(e) => {
                    warn!(
                        "Filter batch {}/{} failed, dropping {} articles: {}",
                        batch_index + 1,
                        total_batches,
                        batch.len(),
                        e
                    );
                    None
                }
            };

            previous = if scores.is_some() {
                BatchOutcome::Succeeded
            } else {
                BatchOutcome::Failed
            };

            let Some(entries) = scores else {
                continue;
            };

            let offset = batch_index * batch_size;
            let mut scored_positions = HashSet::new();
            for entry in entries {
                let Some(position) = batch_position(&entry.id, batch.len()) else {
                    continue;
                };
                if !scored_positions.insert(position) {
                    continue;
                }
                let Some(score) = loose_int(&entry.score).filter(|s| (1..=10).contains(s)) else {
                    continue;
                };
                let score = score as u8;
                if score >= self.threshold {
                    let mut article = batch[position].clone();
                    article.relevance_score = Some(score);
                    accepted.push((offset + position, article));
                }
            }
            debug!(
                "Filter batch {}/{}: {} scored",
                batch_index + 1,
                total_batches,
                scored_positions.len()
            );
        }

        accepted.sort_by_key(|(fetch_order, article)| {
            (Reverse(article.relevance_score.unwrap_or(0)), *fetch_order)
        });
        accepted.truncate(self.max_articles);

        info!(
            "Relevance filter kept {} of {} articles (threshold {}, cap {})",
            accepted.len(),
            articles.len(),
            self.threshold,
            self.max_articles
        );
        accepted.into_iter().map(|(_, article)| article).collect()
    }
}

fn build_prompt(topics: &[String], batch: &[Article]) -> String {
    let topics_list = topics
        .iter()
        .map(|topic| format!("- {}", topic))
        .collect::<Vec<_>>()
        .join("\n");

    let mut articles_text = String::new();
    for (j, article) in batch.iter().enumerate() {
        let _ = write!(
            articles_text,
            "[{}] Title: {}\nSummary: {}\n\n",
            j + 1,
            article.title,
            truncate_chars(&article.summary, PROMPT_EXCERPT_CHARS)
        );
    }

    format!(
        r#"You are a content filter for a professional research digest.

Topics of interest:
{topics_list}

For each article below, decide if it is relevant to ANY of the topics above.
Return ONLY a valid JSON array (no extra text):
[{{"id": 1, "score": 8, "relevant": true}}, {{"id": 2, "score": 3, "relevant": false}}, ...]

Score 1-10 (7+ = relevant). Articles:
{articles_text}"#
    )
}

#[async_trait]
impl ProcessingStage for RelevanceStage {
    fn stage_name(&self) -> String {
        "relevance_filter".to_string()
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Filtering
    }

    async fn process(&self, articles: Vec<Article>, context: &StageContext<'_>) -> Vec<Article> {
        self.filter(articles, &context.group.topics).await
    }
}
