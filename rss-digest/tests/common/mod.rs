#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rss_digest::types::*;
use rss_digest::FeedTransport;
use std::collections::HashMap;
use std::fmt::Write;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Fixed clock for every test: 2025-03-14 12:00 UTC.
pub fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
}

pub struct FeedItem {
    pub link: String,
    pub title: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn new(link: impl Into<String>, title: impl Into<String>, published: Option<DateTime<Utc>>) -> Self {
        let title = title.into();
        Self {
            link: link.into(),
            description: format!("About {}", title),
            title,
            published,
        }
    }
}

/// Minimal RSS 2.0 document.
pub fn rss_document(channel_title: &str, items: &[FeedItem]) -> String {
    let mut body = String::new();
    for item in items {
        let _ = write!(
            body,
            "<item><title>{}</title><link>{}</link><description>{}</description>",
            item.title, item.link, item.description
        );
        if let Some(at) = item.published {
            let _ = write!(body, "<pubDate>{}</pubDate>", at.to_rfc2822());
        }
        body.push_str("</item>\n");
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
<title>{}</title>
<link>https://example.com</link>
<description>test feed</description>
{}
</channel>
</rss>"#,
        channel_title, body
    )
}

/// `count` entries at `https://{host}/post/{i}`, all published an hour ago.
pub fn numbered_items(host: &str, count: usize) -> Vec<FeedItem> {
    let published = run_time() - chrono::Duration::hours(1);
    (1..=count)
        .map(|i| FeedItem::new(format!("https://{}/post/{}", host, i), format!("{} post {}", host, i), Some(published)))
        .collect()
}

/// Serves canned documents by URL; unknown URLs fail like a network error.
#[derive(Default)]
pub struct StaticFeedTransport {
    documents: HashMap<String, String>,
}

impl StaticFeedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, document: String) -> Self {
        self.documents.insert(url.to_string(), document);
        self
    }
}

#[async_trait]
impl FeedTransport for StaticFeedTransport {
    fn transport_name(&self) -> String {
        "static".to_string()
    }

    async fn pull(&self, source: &FeedSource) -> Result<Vec<u8>> {
        self.documents
            .get(&source.url)
            .map(|doc| doc.clone().into_bytes())
            .ok_or_else(|| DigestError::FeedParse(format!("connection refused: {}", source.url)))
    }
}

/// Answers a single request with a chunked body of `chunks` x `chunk_size`
/// bytes and no Content-Length. Returns the URL to request.
pub async fn serve_chunked(chunk_size: usize, chunks: usize) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;

        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let frame_head = format!("{:x}\r\n", chunk_size);
        let payload = vec![b'a'; chunk_size];
        for _ in 0..chunks {
            // The client hangs up once it has seen enough.
            if socket.write_all(frame_head.as_bytes()).await.is_err()
                || socket.write_all(&payload).await.is_err()
                || socket.write_all(b"\r\n").await.is_err()
            {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });
    Ok(format!("http://{}/", addr))
}

pub fn article(n: usize) -> Article {
    let link = format!("https://news.example.com/{}", n);
    Article::new(
        link.clone(),
        link,
        format!("Article {}", n),
        format!("Summary of article {}", n),
        "Example News",
        Published::Date(run_time().date_naive()),
    )
}

pub fn articles(count: usize) -> Vec<Article> {
    (1..=count).map(article).collect()
}

/// Titles listed in a batch prompt, in order (`[n] Title: ...` lines).
pub fn prompt_titles(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix('[')?;
            let (_, title) = rest.split_once("] Title: ")?;
            Some(title.to_string())
        })
        .collect()
}

/// Number in an "Article N" title.
pub fn article_number(title: &str) -> usize {
    title
        .trim_start_matches("Article ")
        .parse()
        .unwrap_or(0)
}

/// JSON reply scoring every article in the prompt with `score_of(n)`.
pub fn score_reply(prompt: &str, score_of: impl Fn(usize) -> u8) -> String {
    let entries: Vec<String> = prompt_titles(prompt)
        .iter()
        .enumerate()
        .map(|(i, title)| {
            let score = score_of(article_number(title));
            format!(
                r#"{{"id": {}, "score": {}, "relevant": {}}}"#,
                i + 1,
                score,
                score >= 7
            )
        })
        .collect();
    format!("[{}]", entries.join(", "))
}

/// Well-formed summary reply with two bullets per article.
pub fn bullet_reply(prompt: &str) -> String {
    let mut reply = String::new();
    for (i, title) in prompt_titles(prompt).iter().enumerate() {
        let _ = write!(reply, "[{}]\n• {} key point\n• {} impact\n", i + 1, title, title);
    }
    reply
}
