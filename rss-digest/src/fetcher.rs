use crate::traits::FeedTransport;
use crate::types::{DigestError, FeedSource, FetchConfig, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fetches feed documents over HTTP, retrying transient failures with
/// exponential backoff.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url).await {
                Ok(body) => {
                    info!(
                        "Fetched feed: {} ({} bytes in {}ms)",
                        url,
                        body.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(body);
                }
                // Oversized feeds will not shrink on retry.
                Err(e @ DigestError::FeedTooLarge { .. }) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DigestError::FeedParse(format!("No response from {}", url))))
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        read_capped(response, self.config.max_feed_size_mb * BYTES_PER_MB).await
    }
}

const BYTES_PER_MB: usize = 1024 * 1024;

/// Read a response body, failing once it grows past `max_bytes`. The
/// declared length is checked first; chunked bodies are counted as read.
pub(crate) async fn read_capped(mut response: Response, max_bytes: usize) -> Result<Vec<u8>> {
    if let Some(content_length) = response.content_length() {
        if content_length as usize > max_bytes {
            return Err(DigestError::FeedTooLarge {
                size_mb: content_length as usize / BYTES_PER_MB,
            });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(DigestError::FeedTooLarge {
                size_mb: (body.len() + chunk.len()) / BYTES_PER_MB,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl FeedTransport for Fetcher {
    fn transport_name(&self) -> String {
        "http".to_string()
    }

    async fn pull(&self, source: &FeedSource) -> Result<Vec<u8>> {
        self.fetch_feed(&source.url).await
    }
}
