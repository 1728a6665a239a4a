use crate::cache::ArticleCache;
use crate::collector::{FailedSource, FeedCollector};
use crate::stages::{ProcessingStage, StageContext};
use crate::types::{DigestError, FeedSource, GroupDigest, Result, TopicGroup};
use chrono::{DateTime, Utc};
use interfaces::{DeliveryChannel, DigestAssembler};
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where a run currently is. Per-group phases repeat for every group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetched,
    Filtering,
    Scraping,
    Summarizing,
    Sentiment,
    Compiled,
    Cached,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Fetched => "fetched",
            RunPhase::Filtering => "filtering",
            RunPhase::Scraping => "scraping",
            RunPhase::Summarizing => "summarizing",
            RunPhase::Sentiment => "sentiment",
            RunPhase::Compiled => "compiled",
            RunPhase::Cached => "cached",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// A topic group together with the addresses its digest goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub group: TopicGroup,
    pub recipients: Vec<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// Nothing relevant and empty digests are not sent.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct GroupReport {
    pub group: String,
    pub relevant: usize,
    pub delivery: DeliveryStatus,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub fetched: usize,
    pub fresh: usize,
    pub failed_sources: Vec<FailedSource>,
    pub groups: Vec<GroupReport>,
    pub recorded: u64,
    pub purged: u64,
}

/// Runs one daily digest: fetch once, process every group over the shared
/// set, deliver per group, then remember what was seen.
pub struct DigestPipeline {
    sources: Vec<FeedSource>,
    collector: FeedCollector,
    cache: ArticleCache,
    stages: Vec<Box<dyn ProcessingStage>>,
    groups: Vec<ResolvedGroup>,
    assembler: Arc<dyn DigestAssembler>,
    delivery: Arc<dyn DeliveryChannel>,
    retention_days: u32,
    send_empty: bool,
}

impl DigestPipeline {
    pub fn builder(collector: FeedCollector, cache: ArticleCache) -> PipelineBuilder {
        PipelineBuilder::new(collector, cache)
    }

    /// Execute the run. Only cache failures are returned as errors; feed,
    /// model and delivery failures are reported in the `RunReport`. The
    /// cache is closed either way.
    pub async fn run(self, now: DateTime<Utc>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("digest_run", run_id = %run_id);
        let result = self.execute(run_id, now).instrument(span.clone()).await;
        self.cache.close().instrument(span.clone()).await;
        if result.is_ok() {
            span.in_scope(|| log_phase(RunPhase::Done));
        }
        result
    }

    async fn execute(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<RunReport> {
        let today = now.date_naive();
        info!(
            "Starting digest run: {} sources, {} groups, {} stages",
            self.sources.len(),
            self.groups.len(),
            self.stages.len()
        );
        log_phase(RunPhase::Idle);

        let purged = self.cache.purge_expired(self.retention_days, today).await?;

        let outcome = self.collector.collect(&self.sources, now).await;
        let fetched_ids: Vec<String> = outcome
            .articles
            .iter()
            .map(|article| article.identifier.clone())
            .collect();
        let fetched = fetched_ids.len();
        let fresh_articles = self.cache.retain_unseen(outcome.articles).await?;
        let fresh = fresh_articles.len();
        info!(
            "Fetched {} articles ({} new, {} sources failed)",
            fetched,
            fresh,
            outcome.failed_sources.len()
        );
        log_phase(RunPhase::Fetched);

        let mut group_reports = Vec::with_capacity(self.groups.len());
        for resolved in &self.groups {
            let report = self.process_group(resolved, fresh_articles.clone(), today).await;
            group_reports.push(report);
        }

        let recorded = self.cache.record(&fetched_ids, today).await?;
        log_phase(RunPhase::Cached);

        Ok(RunReport {
            run_id,
            fetched,
            fresh,
            failed_sources: outcome.failed_sources,
            groups: group_reports,
            recorded,
            purged,
        })
    }

    async fn process_group(
        &self,
        resolved: &ResolvedGroup,
        mut articles: Vec<crate::types::Article>,
        today: chrono::NaiveDate,
    ) -> GroupReport {
        let group = &resolved.group;
        info!("Processing group '{}' ({} topics)", group.name, group.topics.len());

        let context = StageContext { group };
        for stage in &self.stages {
            log_phase(stage.phase());
            if articles.is_empty() {
                break;
            }
            articles = stage.process(articles, &context).await;
        }

        let digest = GroupDigest {
            group: group.name.clone(),
            topics: group.topics.clone(),
            articles,
            generated_on: today,
            is_default_group: resolved.is_default,
        };
        let relevant = digest.articles.len();
        log_phase(RunPhase::Compiled);

        let delivery = if relevant == 0 && !self.send_empty {
            info!("Group '{}' has no relevant articles, not sending", group.name);
            DeliveryStatus::Skipped
        } else {
            self.deliver(&digest, &resolved.recipients).await
        };

        GroupReport {
            group: group.name.clone(),
            relevant,
            delivery,
        }
    }

    async fn deliver(&self, digest: &GroupDigest, recipients: &[String]) -> DeliveryStatus {
        let rendered = match self.assembler.assemble(digest) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Failed to assemble digest for '{}': {:#}", digest.group, e);
                return DeliveryStatus::Failed(format!("assembly: {}", e));
            }
        };

        match self.delivery.deliver(&rendered, recipients).await {
            Ok(()) => {
                info!(
                    "Delivered '{}' via {} to {} recipients",
                    rendered.subject,
                    self.delivery.channel_name(),
                    recipients.len()
                );
                DeliveryStatus::Delivered
            }
            Err(e) => {
                warn!("Delivery failed for '{}': {:#}", digest.group, e);
                DeliveryStatus::Failed(e.to_string())
            }
        }
    }
}

fn log_phase(phase: RunPhase) {
    info!(phase = %phase, "Run phase: {}", phase);
}

/// Pipeline builder for easier configuration
pub struct PipelineBuilder {
    sources: Vec<FeedSource>,
    collector: FeedCollector,
    cache: ArticleCache,
    stages: Vec<Box<dyn ProcessingStage>>,
    groups: Vec<ResolvedGroup>,
    assembler: Option<Arc<dyn DigestAssembler>>,
    delivery: Option<Arc<dyn DeliveryChannel>>,
    retention_days: u32,
    send_empty: bool,
}

impl PipelineBuilder {
    pub fn new(collector: FeedCollector, cache: ArticleCache) -> Self {
        Self {
            sources: Vec::new(),
            collector,
            cache,
            stages: Vec::new(),
            groups: Vec::new(),
            assembler: None,
            delivery: None,
            retention_days: 30,
            send_empty: true,
        }
    }

    pub fn sources(mut self, sources: Vec<FeedSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn add_processing_stage(mut self, stage: Box<dyn ProcessingStage>) -> Self {
        info!("Adding processing stage to pipeline: {}", stage.stage_name());
        self.stages.push(stage);
        self
    }

    pub fn groups(mut self, groups: Vec<ResolvedGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn assembler(mut self, assembler: Arc<dyn DigestAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn delivery(mut self, delivery: Arc<dyn DeliveryChannel>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn retention_days(mut self, retention_days: u32) -> Self {
        self.retention_days = retention_days;
        self
    }

    pub fn send_empty(mut self, send_empty: bool) -> Self {
        self.send_empty = send_empty;
        self
    }

    pub fn build(self) -> Result<DigestPipeline> {
        if self.groups.is_empty() {
            return Err(DigestError::config("pipeline needs at least one group"));
        }
        let assembler = self
            .assembler
            .ok_or_else(|| DigestError::config("pipeline needs a digest assembler"))?;
        let delivery = self
            .delivery
            .ok_or_else(|| DigestError::config("pipeline needs a delivery channel"))?;

        Ok(DigestPipeline {
            sources: self.sources,
            collector: self.collector,
            cache: self.cache,
            stages: self.stages,
            groups: self.groups,
            assembler,
            delivery,
            retention_days: self.retention_days,
            send_empty: self.send_empty,
        })
    }
}
