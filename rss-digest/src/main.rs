use chrono::Utc;
use clap::Parser;
use email_delivery::{
    EnvRecipientResolver, FileDelivery, HtmlDigestAssembler, SmtpConfig, SmtpDelivery,
};
use interfaces::DeliveryChannel;
use rss_digest::stages::{
    Batcher, EnrichStage, HttpPageFetcher, RelevanceStage, SentimentStage, SummarizationStage,
};
use rss_digest::{
    ArticleCache, DeliveryStatus, DigestConfig, DigestPipeline, FeedCollector, FetchConfig,
    Fetcher, ModelClient,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Fetch RSS/Atom feeds, keep what matters to each topic group, summarize
/// it and email the digest.
#[derive(Parser, Debug)]
#[command(name = "rss-digest", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the cache database path from the config
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Write digests to files instead of sending email
    #[arg(long)]
    dry_run: bool,

    /// Directory for dry-run output
    #[arg(long, default_value = "digests")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DigestConfig::load(&cli.config)?;
    let groups = config.run_mode()?.resolve(&EnvRecipientResolver)?;

    let model: Arc<dyn ModelClient> = Arc::new(config.model_client()?);
    info!("Using model client: {}", model.adapter_name());

    let delivery: Arc<dyn DeliveryChannel> = if cli.dry_run {
        info!("Dry run: writing digests to {}", cli.out_dir.display());
        Arc::new(FileDelivery::new(&cli.out_dir))
    } else {
        let email = &config.email;
        Arc::new(SmtpDelivery::new(SmtpConfig::from_env(
            &email.smtp_host,
            email.smtp_port,
            &email.from_env,
            &email.password_env,
        )?)?)
    };

    let fetch_config = FetchConfig::default();
    let user_agent = fetch_config.user_agent.clone();
    let collector = FeedCollector::new(Arc::new(Fetcher::new(fetch_config)?), config.collect_options());

    let cache_path = cli.cache.unwrap_or_else(|| config.cache_path.clone());
    let cache = ArticleCache::open(&cache_path).await?;

    let mut builder = DigestPipeline::builder(collector, cache)
        .sources(config.sources())
        .groups(groups)
        .assembler(Arc::new(HtmlDigestAssembler::new(&config.email.subject_prefix)))
        .delivery(delivery)
        .retention_days(config.retention_days)
        .send_empty(config.send_empty)
        .add_processing_stage(Box::new(
            RelevanceStage::new(model.clone(), Batcher::new(config.batch_size, config.pacing_policy()))
                .with_threshold(config.relevance_threshold)
                .with_max_articles(config.max_articles),
        ));

    if config.scrape.enabled {
        let fetcher = HttpPageFetcher::new(&user_agent, Duration::from_secs(config.scrape.timeout_secs))?;
        builder = builder.add_processing_stage(Box::new(
            EnrichStage::new(Arc::new(fetcher))
                .with_limits(config.scrape.max_chars, config.scrape.min_chars),
        ));
    }

    builder = builder.add_processing_stage(Box::new(
        SummarizationStage::new(
            model.clone(),
            Batcher::new(config.batch_size, config.pacing_policy()),
        )
        .with_fallback_chars(config.summary_fallback_chars()),
    ));

    if config.sentiment.enabled {
        builder = builder.add_processing_stage(Box::new(SentimentStage::new(
            model.clone(),
            Batcher::new(config.batch_size, config.pacing_policy()),
        )));
    }

    let report = builder.build()?.run(Utc::now()).await?;

    info!(
        "Run {} finished: {} fetched, {} new, {} recorded, {} purged",
        report.run_id, report.fetched, report.fresh, report.recorded, report.purged
    );
    for failed in &report.failed_sources {
        warn!("Source failed: {} ({})", failed.url, failed.error);
    }
    for group in &report.groups {
        match &group.delivery {
            DeliveryStatus::Delivered => info!("  {}: {} articles delivered", group.group, group.relevant),
            DeliveryStatus::Skipped => info!("  {}: nothing relevant, skipped", group.group),
            DeliveryStatus::Failed(reason) => warn!("  {}: delivery failed: {}", group.group, reason),
        }
    }
    Ok(())
}
