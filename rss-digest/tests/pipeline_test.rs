mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::*;
use email_delivery::{HtmlDigestAssembler, StaticRecipientResolver};
use interfaces::{DeliveryChannel, RenderedDigest};
use rss_digest::stages::{
    Batcher, EnrichStage, PageFetcher, ProcessingStage, RelevanceStage, SentimentStage,
    SummarizationStage,
};
use rss_digest::types::*;
use rss_digest::{
    ArticleCache, CollectOptions, DeliveryStatus, DigestPipeline, FeedCollector, MockModelClient,
    NoPacing, ResolvedGroup, RunMode,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const FEED: &str = "https://news.example.com/rss";

fn feed_transport(count: usize) -> StaticFeedTransport {
    dated_feed_transport(count, Some(run_time() - Duration::hours(2)))
}

/// Undated entries pass the recency window on any run date.
fn undated_feed_transport(count: usize) -> StaticFeedTransport {
    dated_feed_transport(count, None)
}

fn dated_feed_transport(count: usize, published: Option<chrono::DateTime<chrono::Utc>>) -> StaticFeedTransport {
    let items: Vec<FeedItem> = (1..=count)
        .map(|n| FeedItem::new(format!("https://news.example.com/{}", n), format!("Article {}", n), published))
        .collect();
    StaticFeedTransport::new().with_feed(FEED, rss_document("Example News", &items))
}

/// Finance likes articles 1-6, Tech likes 15-18; everything else scores 3.
fn model() -> Arc<MockModelClient> {
    Arc::new(MockModelClient::new("pipeline", |request| {
        let prompt = &request.prompt;
        if prompt.contains("Summarize each article") {
            return Ok(bullet_reply(prompt));
        }
        let finance = prompt.contains("- Banking AI");
        Ok(score_reply(prompt, |n| {
            let liked = if finance { (1..=6).contains(&n) } else { (15..=18).contains(&n) };
            if liked {
                8
            } else {
                3
            }
        }))
    }))
}

#[derive(Default)]
struct RecordingDelivery {
    fail_for: Option<String>,
    sent: Mutex<Vec<(RenderedDigest, Vec<String>)>>,
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    fn channel_name(&self) -> String {
        "recording".to_string()
    }

    async fn deliver(&self, digest: &RenderedDigest, recipients: &[String]) -> anyhow::Result<()> {
        if self.fail_for.as_deref() == Some(digest.group.as_str()) {
            anyhow::bail!("SMTP 535 authentication failed");
        }
        self.sent
            .lock()
            .unwrap()
            .push((digest.clone(), recipients.to_vec()));
        Ok(())
    }
}

fn groups() -> Vec<ResolvedGroup> {
    let mode = RunMode::MultiGroup(vec![
        TopicGroup {
            name: "Finance".to_string(),
            topics: vec!["Banking AI".to_string()],
            recipient_key: "FINANCE_TO".to_string(),
        },
        TopicGroup {
            name: "Tech".to_string(),
            topics: vec!["Semiconductors".to_string()],
            recipient_key: "TECH_TO".to_string(),
        },
    ]);
    let resolver = StaticRecipientResolver::new()
        .with("FINANCE_TO", "cfo@example.com; analyst@example.com")
        .with("TECH_TO", "cto@example.com");
    mode.resolve(&resolver).unwrap()
}

async fn pipeline(
    cache_path: &Path,
    model: Arc<MockModelClient>,
    delivery: Arc<RecordingDelivery>,
    groups: Vec<ResolvedGroup>,
    send_empty: bool,
) -> Result<DigestPipeline> {
    let stages: Vec<Box<dyn ProcessingStage>> = vec![
        Box::new(RelevanceStage::new(model.clone(), Batcher::new(5, Arc::new(NoPacing)))),
        Box::new(SummarizationStage::new(model, Batcher::new(5, Arc::new(NoPacing)))),
    ];
    pipeline_with(cache_path, feed_transport(20), stages, delivery, groups, send_empty).await
}

async fn pipeline_with(
    cache_path: &Path,
    transport: StaticFeedTransport,
    stages: Vec<Box<dyn ProcessingStage>>,
    delivery: Arc<RecordingDelivery>,
    groups: Vec<ResolvedGroup>,
    send_empty: bool,
) -> Result<DigestPipeline> {
    let collector = FeedCollector::new(Arc::new(transport), CollectOptions::default());
    let cache = ArticleCache::open(cache_path).await?;
    let mut builder = DigestPipeline::builder(collector, cache)
        .sources(vec![FeedSource::new(FEED)])
        .groups(groups)
        .assembler(Arc::new(HtmlDigestAssembler::default()))
        .delivery(delivery)
        .retention_days(30)
        .send_empty(send_empty);
    for stage in stages {
        builder = builder.add_processing_stage(stage);
    }
    builder.build()
}

fn single_group(recipient: &str) -> Result<Vec<ResolvedGroup>> {
    RunMode::SingleGroup {
        topics: vec!["Banking AI".to_string()],
        recipient_key: "GMAIL_TO".to_string(),
    }
    .resolve(&StaticRecipientResolver::new().with("GMAIL_TO", recipient))
}

/// Serves a long article body for every link and remembers what was asked for.
#[derive(Default)]
struct RecordingPages {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl PageFetcher for RecordingPages {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.requested.lock().unwrap().push(url.to_string());
        let body = format!("Scraped body for {}. ", url).repeat(12);
        Ok(format!("<html><body><article><p>{}</p></article></body></html>", body))
    }
}

#[tokio::test]
async fn test_groups_are_scored_independently() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let cache_path = dir.path().join("seen.db");
    let delivery = Arc::new(RecordingDelivery::default());

    let report = pipeline(&cache_path, model(), delivery.clone(), groups(), true)
        .await?
        .run(run_time())
        .await?;

    assert_eq!(report.fetched, 20);
    assert_eq!(report.fresh, 20);
    assert_eq!(report.recorded, 20);
    assert!(report.failed_sources.is_empty());
    let counts: Vec<(&str, usize)> = report
        .groups
        .iter()
        .map(|g| (g.group.as_str(), g.relevant))
        .collect();
    assert_eq!(counts, vec![("Finance", 6), ("Tech", 4)]);
    assert!(report
        .groups
        .iter()
        .all(|g| g.delivery == DeliveryStatus::Delivered));

    let sent = delivery.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let (finance, finance_to) = &sent[0];
    assert_eq!(finance.subject, "AI Research Digest - Finance - 2025-03-14");
    assert_eq!(finance_to, &vec!["cfo@example.com".to_string(), "analyst@example.com".to_string()]);
    assert!(finance.html.contains("Article 1 key point"));
    assert!(finance.html.contains("6 articles found"));
    // Article 1 scored 8 for Finance but 3 for Tech.
    let (tech, _) = &sent[1];
    assert!(!tech.html.contains("https://news.example.com/1\""));
    assert!(tech.html.contains("Article 15 key point"));
    Ok(())
}

#[tokio::test]
async fn test_delivery_failure_is_reported_per_group() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let cache_path = dir.path().join("seen.db");
    let delivery = Arc::new(RecordingDelivery {
        fail_for: Some("Finance".to_string()),
        ..Default::default()
    });

    let report = pipeline(&cache_path, model(), delivery.clone(), groups(), true)
        .await?
        .run(run_time())
        .await?;

    match &report.groups[0].delivery {
        DeliveryStatus::Failed(reason) => assert!(reason.contains("535")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.groups[1].delivery, DeliveryStatus::Delivered);
    assert_eq!(delivery.sent.lock().unwrap().len(), 1);
    assert_eq!(report.recorded, 20);
    Ok(())
}

#[tokio::test]
async fn test_second_run_sees_nothing_new() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let cache_path = dir.path().join("seen.db");

    pipeline(&cache_path, model(), Arc::new(RecordingDelivery::default()), groups(), true)
        .await?
        .run(run_time())
        .await?;

    let model = model();
    let delivery = Arc::new(RecordingDelivery::default());
    let report = pipeline(&cache_path, model.clone(), delivery.clone(), groups(), false)
        .await?
        .run(run_time() + Duration::days(1) - Duration::hours(3))
        .await?;

    assert_eq!(report.fetched, 20);
    assert_eq!(report.fresh, 0);
    assert_eq!(report.recorded, 0);
    assert!(report
        .groups
        .iter()
        .all(|g| g.relevant == 0 && g.delivery == DeliveryStatus::Skipped));
    assert_eq!(model.call_count(), 0);
    assert!(delivery.sent.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_digest_is_sent_when_enabled() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let quiet_model = Arc::new(MockModelClient::new("quiet", |request| {
        Ok(score_reply(&request.prompt, |_| 2))
    }));
    let single = RunMode::SingleGroup {
        topics: vec!["Quantum sensing".to_string()],
        recipient_key: "GMAIL_TO".to_string(),
    }
    .resolve(&StaticRecipientResolver::new().with("GMAIL_TO", "me@example.com"))?;
    let delivery = Arc::new(RecordingDelivery::default());

    let report = pipeline(&dir.path().join("seen.db"), quiet_model, delivery.clone(), single, true)
        .await?
        .run(run_time())
        .await?;

    assert_eq!(report.groups[0].relevant, 0);
    assert_eq!(report.groups[0].delivery, DeliveryStatus::Delivered);
    let sent = delivery.sent.lock().unwrap();
    assert_eq!(sent[0].0.subject, "AI Research Digest - 2025-03-14");
    assert!(sent[0].0.html.contains("No relevant articles found today"));
    Ok(())
}

#[tokio::test]
async fn test_expired_entries_are_purged_before_dedup() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let cache_path = dir.path().join("seen.db");
    let stages = |model: Arc<MockModelClient>| -> Vec<Box<dyn ProcessingStage>> {
        vec![
            Box::new(RelevanceStage::new(model.clone(), Batcher::new(5, Arc::new(NoPacing)))),
            Box::new(SummarizationStage::new(model, Batcher::new(5, Arc::new(NoPacing)))),
        ]
    };

    let first = pipeline_with(
        &cache_path,
        undated_feed_transport(20),
        stages(model()),
        Arc::new(RecordingDelivery::default()),
        groups(),
        true,
    )
    .await?
    .run(run_time())
    .await?;
    assert_eq!(first.fresh, 20);
    assert_eq!(first.recorded, 20);

    // 31 days later every entry is past the 30 day retention.
    let model = model();
    let delivery = Arc::new(RecordingDelivery::default());
    let report = pipeline_with(
        &cache_path,
        undated_feed_transport(20),
        stages(model.clone()),
        delivery.clone(),
        groups(),
        true,
    )
    .await?
    .run(run_time() + Duration::days(31))
    .await?;

    assert_eq!(report.purged, 20);
    assert_eq!(report.fetched, 20);
    assert_eq!(report.fresh, report.fetched);
    assert_eq!(report.recorded, 20);
    let counts: Vec<usize> = report.groups.iter().map(|g| g.relevant).collect();
    assert_eq!(counts, vec![6, 4]);
    assert!(model.call_count() > 0);
    assert_eq!(delivery.sent.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_full_stage_chain_runs_in_order() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let model = Arc::new(MockModelClient::new("chain", |request| {
        let prompt = &request.prompt;
        if prompt.contains("Classify the overall sentiment") {
            let mut entries = Vec::new();
            for line in prompt.lines() {
                let Some((id, points)) = line.strip_prefix('[').and_then(|rest| rest.split_once("] ")) else {
                    continue;
                };
                let label = if points.starts_with("Article 1 ") {
                    "positive"
                } else if points.starts_with("Article 2 ") {
                    "negative"
                } else {
                    continue;
                };
                entries.push(format!(r#"{{"id": {}, "sentiment": "{}"}}"#, id, label));
            }
            return Ok(format!("[{}]", entries.join(", ")));
        }
        if prompt.contains("Summarize each article") {
            return Ok(bullet_reply(prompt));
        }
        Ok(score_reply(prompt, |n| if n <= 3 { 8 } else { 3 }))
    }));
    let pages = Arc::new(RecordingPages::default());
    let stages: Vec<Box<dyn ProcessingStage>> = vec![
        Box::new(RelevanceStage::new(model.clone(), Batcher::new(5, Arc::new(NoPacing)))),
        Box::new(EnrichStage::new(pages.clone())),
        Box::new(SummarizationStage::new(model.clone(), Batcher::new(5, Arc::new(NoPacing)))),
        Box::new(SentimentStage::new(model.clone(), Batcher::new(5, Arc::new(NoPacing)))),
    ];
    let delivery = Arc::new(RecordingDelivery::default());

    let report = pipeline_with(
        &dir.path().join("seen.db"),
        feed_transport(10),
        stages,
        delivery.clone(),
        single_group("me@example.com")?,
        true,
    )
    .await?
    .run(run_time())
    .await?;

    assert_eq!(report.groups[0].relevant, 3);

    // Only the filter's survivors were scraped.
    assert_eq!(
        *pages.requested.lock().unwrap(),
        vec![
            "https://news.example.com/1".to_string(),
            "https://news.example.com/2".to_string(),
            "https://news.example.com/3".to_string(),
        ]
    );

    // Two filter batches, then one summary batch over scraped text, then sentiment over bullets.
    let requests = model.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].prompt.contains("content filter"));
    assert!(requests[1].prompt.contains("content filter"));
    assert!(requests[2].prompt.contains("Summarize each article"));
    assert!(requests[2]
        .prompt
        .contains("Content: Scraped body for https://news.example.com/1."));
    assert!(requests[3].prompt.contains("Classify the overall sentiment"));
    assert!(requests[3]
        .prompt
        .contains("[1] Article 1 key point; Article 1 impact"));

    let sent = delivery.sent.lock().unwrap();
    let html = &sent[0].0.html;
    assert!(html.contains(">Positive</span>"));
    assert!(html.contains(">Negative</span>"));
    assert!(html.contains(">Neutral</span>"));
    Ok(())
}

#[tokio::test]
async fn test_cache_error_ends_run_and_releases_cache() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let cache_path = dir.path().join("seen.db");
    let model = model();
    let delivery = Arc::new(RecordingDelivery::default());
    let collector = FeedCollector::new(Arc::new(feed_transport(5)), CollectOptions::default());

    let result = DigestPipeline::builder(collector, ArticleCache::open(&cache_path).await?)
        .sources(vec![FeedSource::new(FEED)])
        .groups(groups())
        .assembler(Arc::new(HtmlDigestAssembler::default()))
        .delivery(delivery.clone())
        .retention_days(100_000_000)
        .add_processing_stage(Box::new(RelevanceStage::new(
            model.clone(),
            Batcher::new(5, Arc::new(NoPacing)),
        )))
        .build()?
        .run(run_time())
        .await;

    assert!(matches!(result, Err(DigestError::Configuration(_))));
    assert_eq!(model.call_count(), 0);
    assert!(delivery.sent.lock().unwrap().is_empty());

    let cache = ArticleCache::open(&cache_path).await?;
    assert_eq!(cache.entry_count().await?, 0);
    cache.close().await;
    Ok(())
}
