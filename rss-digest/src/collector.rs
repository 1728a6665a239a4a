use crate::parser::FeedParser;
use crate::traits::FeedTransport;
use crate::types::{Article, FeedSource, ParsedEntry, Published, Result};
use crate::utils::{text, url};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// What to do with entries whose publish time cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndatedPolicy {
    /// Keep the entry and mark it `Published::Unknown`.
    #[default]
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub lookback_hours: u32,
    pub undated: UndatedPolicy,
    /// Entries stamped up to this far in the future still count as recent.
    pub clock_skew: Duration,
    pub max_excerpt_chars: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            undated: UndatedPolicy::Include,
            clock_skew: Duration::minutes(15),
            max_excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedSource {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub articles: Vec<Article>,
    pub failed_sources: Vec<FailedSource>,
}

/// Pulls every configured source once and produces the shared, deduplicated
/// article set for a run.
pub struct FeedCollector {
    transport: Arc<dyn FeedTransport>,
    options: CollectOptions,
}

impl FeedCollector {
    pub fn new(transport: Arc<dyn FeedTransport>, options: CollectOptions) -> Self {
        Self { transport, options }
    }

    /// Sources are visited in order; a failing source is logged and skipped.
    /// Duplicates across sources keep the first copy encountered.
    pub async fn collect(&self, sources: &[FeedSource], now: DateTime<Utc>) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = 0usize;

        for source in sources {
            match self.collect_source(source, now).await {
                Ok(articles) => {
                    info!("Collected {} recent entries from {}", articles.len(), source.url);
                    for article in articles {
                        if seen.insert(article.identifier.clone()) {
                            outcome.articles.push(article);
                        } else {
                            duplicates += 1;
                            debug!("Dropping duplicate entry {} from {}", article.identifier, source.url);
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not fetch {} via {}: {}", source.url, self.transport.transport_name(), e);
                    outcome.failed_sources.push(FailedSource {
                        url: source.url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if duplicates > 0 {
            info!("Removed {} cross-feed duplicate entries", duplicates);
        }
        outcome
    }

    async fn collect_source(&self, source: &FeedSource, now: DateTime<Utc>) -> Result<Vec<Article>> {
        let body = self.transport.pull(source).await?;
        let feed = FeedParser::parse_feed(&body)?;

        let label = source
            .label
            .clone()
            .or(feed.title)
            .unwrap_or_else(|| source.url.clone());

        Ok(feed
            .entries
            .into_iter()
            .filter_map(|entry| self.admit(entry, &label, now))
            .collect())
    }

    fn admit(&self, entry: ParsedEntry, label: &str, now: DateTime<Utc>) -> Option<Article> {
        let published = match entry.published_at {
            Some(at) => {
                if !self.within_window(at, now) {
                    return None;
                }
                Published::Date(at.date_naive())
            }
            None => match self.options.undated {
                UndatedPolicy::Include => Published::Unknown,
                UndatedPolicy::Exclude => return None,
            },
        };

        let excerpt = entry
            .description
            .as_deref()
            .map(text::strip_html)
            .unwrap_or_default();
        let summary = text::truncate_chars(&excerpt, self.options.max_excerpt_chars).to_string();

        Some(Article::new(
            url::canonicalize(&entry.url),
            entry.url,
            entry.title,
            summary,
            label,
            published,
        ))
    }

    /// Inclusive on both ends: `[now - lookback, now + clock_skew]`.
    fn within_window(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let after_cutoff = now
            .checked_sub_signed(Duration::hours(i64::from(self.options.lookback_hours)))
            .map_or(true, |cutoff| at >= cutoff);
        let before_horizon = now
            .checked_add_signed(self.options.clock_skew)
            .map_or(true, |horizon| at <= horizon);
        after_cutoff && before_horizon
    }
}
