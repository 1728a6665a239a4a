use super::{ProcessingStage, StageContext};
use crate::fetcher::read_capped;
use crate::pipeline::RunPhase;
use crate::types::{Article, Result};
use crate::utils::text::{normalize_whitespace, truncate_chars};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_CHARS: usize = 4000;
pub const DEFAULT_MIN_CHARS: usize = 200;
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

/// Source of article page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = read_capped(response, MAX_PAGE_BYTES).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Replaces a relevant article's short feed excerpt with text scraped from
/// its page, when the page yields enough of it.
pub struct EnrichStage {
    fetcher: Arc<dyn PageFetcher>,
    max_chars: usize,
    min_chars: usize,
}

impl EnrichStage {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            max_chars: DEFAULT_MAX_CHARS,
            min_chars: DEFAULT_MIN_CHARS,
        }
    }

    pub fn with_limits(mut self, max_chars: usize, min_chars: usize) -> Self {
        self.max_chars = max_chars;
        self.min_chars = min_chars;
        self
    }

    /// Returns `true` when the summary was replaced.
    pub async fn enrich(&self, article: &mut Article) -> bool {
        let html = match self.fetcher.fetch_page(&article.link).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Could not scrape {}: {}", article.link, e);
                return false;
            }
        };

        match extract_text(&html, self.max_chars) {
            Some(text) if text.chars().count() >= self.min_chars => {
                article.summary = text;
                true
            }
            _ => {
                debug!("Scraped text too short for {}, keeping excerpt", article.link);
                false
            }
        }
    }
}

/// Paragraph text of an HTML page: `article p` when present, otherwise
/// every `p`. Whitespace-normalized and cut to `max_chars`.
pub fn extract_text(html: &str, max_chars: usize) -> Option<String> {
    let document = Html::parse_document(html);
    let scoped = Selector::parse("article p").ok()?;
    let all = Selector::parse("p").ok()?;

    let mut paragraphs: Vec<String> = document
        .select(&scoped)
        .map(|p| p.text().collect::<String>())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = document
            .select(&all)
            .map(|p| p.text().collect::<String>())
            .collect();
    }

    let text = normalize_whitespace(&paragraphs.join(" "));
    if text.is_empty() {
        return None;
    }
    Some(truncate_chars(&text, max_chars).to_string())
}

#[async_trait]
impl ProcessingStage for EnrichStage {
    fn stage_name(&self) -> String {
        "page_enricher".to_string()
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Scraping
    }

    async fn process(&self, mut articles: Vec<Article>, _context: &StageContext<'_>) -> Vec<Article> {
        let mut enriched = 0usize;
        for article in articles.iter_mut() {
            if self.enrich(article).await {
                enriched += 1;
            }
        }
        info!("Enriched {} of {} articles from their pages", enriched, articles.len());
        articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_article_paragraphs() {
        let html = "<html><body><p>nav junk</p><article><p>First  para.</p><p>Second\npara.</p></article></body></html>";
        assert_eq!(extract_text(html, 100).as_deref(), Some("First para. Second para."));
    }

    #[test]
    fn falls_back_to_all_paragraphs() {
        let html = "<html><body><div><p>Only</p><p>paragraphs</p></div></body></html>";
        assert_eq!(extract_text(html, 100).as_deref(), Some("Only paragraphs"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let html = "<p>héllo wörld</p>";
        assert_eq!(extract_text(html, 4).as_deref(), Some("héll"));
    }

    #[test]
    fn no_paragraphs_is_none() {
        assert_eq!(extract_text("<div>text</div>", 100), None);
    }
}
