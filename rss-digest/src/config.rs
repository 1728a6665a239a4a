use crate::collector::{CollectOptions, UndatedPolicy, DEFAULT_EXCERPT_CHARS};
use crate::llm_adapter::ChatCompletionsClient;
use crate::pacing::{BackoffPacing, FixedDelay, PacingPolicy};
use crate::pipeline::ResolvedGroup;
use crate::stages::summarize::DEFAULT_FALLBACK_CHARS;
use crate::types::{DigestError, FeedSource, Result, TopicGroup};
use interfaces::RecipientResolver;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_RECIPIENT_KEY: &str = "GMAIL_TO";
pub const DEFAULT_GROUP_NAME: &str = "default";

/// A feed entry in the config: either a bare URL or `{ url, label }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedEntry {
    Url(String),
    Labeled {
        url: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl From<&FeedEntry> for FeedSource {
    fn from(entry: &FeedEntry) -> Self {
        match entry {
            FeedEntry::Url(url) => FeedSource::new(url.clone()),
            FeedEntry::Labeled { url, label } => FeedSource {
                url: url.clone(),
                label: label.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub recipient_key: Option<String>,
}

impl GroupConfig {
    /// Explicit key, or `DIGEST_RECIPIENTS_<NAME>` with the name upper-cased
    /// and non-alphanumerics replaced by `_`.
    pub fn recipient_key(&self) -> String {
        self.recipient_key.clone().unwrap_or_else(|| {
            let suffix: String = self
                .name
                .trim()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            format!("DIGEST_RECIPIENTS_{}", suffix)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub name: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            name: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingStrategy {
    #[default]
    Fixed,
    Backoff,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub delay_ms: u64,
    pub strategy: PacingStrategy,
    /// Upper bound for the backoff strategy.
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            strategy: PacingStrategy::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_chars: usize,
    pub min_chars: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 10,
            max_chars: 4000,
            min_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_env: String,
    pub password_env: String,
    pub subject_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            from_env: "GMAIL_FROM".to_string(),
            password_env: "GMAIL_APP_PASSWORD".to_string(),
            subject_prefix: "AI Research Digest".to_string(),
        }
    }
}

const MAX_RETENTION_DAYS: u32 = 3650;
const MAX_LOOKBACK_HOURS: u32 = 24 * 366;
const MAX_CLOCK_SKEW_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub feeds: Vec<FeedEntry>,
    pub lookback_hours: u32,
    pub topics: Option<Vec<String>>,
    pub groups: Option<Vec<GroupConfig>>,
    pub batch_size: usize,
    pub relevance_threshold: u8,
    pub max_articles: usize,
    pub retention_days: u32,
    pub cache_path: PathBuf,
    pub undated: UndatedPolicy,
    pub clock_skew_minutes: i64,
    pub send_empty: bool,
    pub model: ModelConfig,
    pub pacing: PacingConfig,
    pub scrape: ScrapeConfig,
    pub sentiment: SentimentConfig,
    pub email: EmailConfig,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            lookback_hours: 24,
            topics: None,
            groups: None,
            batch_size: 5,
            relevance_threshold: 7,
            max_articles: 12,
            retention_days: 30,
            cache_path: PathBuf::from("seen_articles.db"),
            undated: UndatedPolicy::Include,
            clock_skew_minutes: 15,
            send_empty: true,
            model: ModelConfig::default(),
            pacing: PacingConfig::default(),
            scrape: ScrapeConfig::default(),
            sentiment: SentimentConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

/// Single-user mode synthesizes one group; multi-user mode lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    SingleGroup {
        topics: Vec<String>,
        recipient_key: String,
    },
    MultiGroup(Vec<TopicGroup>),
}

impl RunMode {
    /// Attach recipients to every group. A group whose key resolves to
    /// nothing is a configuration error.
    pub fn resolve(&self, resolver: &dyn RecipientResolver) -> Result<Vec<ResolvedGroup>> {
        let (groups, is_default) = match self {
            RunMode::SingleGroup {
                topics,
                recipient_key,
            } => (
                vec![TopicGroup {
                    name: DEFAULT_GROUP_NAME.to_string(),
                    topics: topics.clone(),
                    recipient_key: recipient_key.clone(),
                }],
                true,
            ),
            RunMode::MultiGroup(groups) => (groups.clone(), false),
        };

        groups
            .into_iter()
            .map(|group| {
                let recipients = resolver
                    .resolve(&group.recipient_key)
                    .filter(|list| !list.is_empty())
                    .ok_or_else(|| {
                        DigestError::config(format!(
                            "no recipients for group '{}' (set {})",
                            group.name, group.recipient_key
                        ))
                    })?;
                Ok(ResolvedGroup {
                    group,
                    recipients,
                    is_default,
                })
            })
            .collect()
    }
}

impl DigestConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: DigestConfig = toml::from_str(raw)
            .map_err(|e| DigestError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DigestError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(
            "Loaded config from {}: {} feeds",
            path.display(),
            config.feeds.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(DigestError::config("at least one feed is required"));
        }
        if self.batch_size == 0 {
            return Err(DigestError::config("batch_size must be at least 1"));
        }
        if self.max_articles == 0 {
            return Err(DigestError::config("max_articles must be at least 1"));
        }
        if !(1..=10).contains(&self.relevance_threshold) {
            return Err(DigestError::config("relevance_threshold must be between 1 and 10"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(DigestError::config(format!(
                "retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.lookback_hours) {
            return Err(DigestError::config(format!(
                "lookback_hours must be between 1 and {}",
                MAX_LOOKBACK_HOURS
            )));
        }
        if !(0..=MAX_CLOCK_SKEW_MINUTES).contains(&self.clock_skew_minutes) {
            return Err(DigestError::config(format!(
                "clock_skew_minutes must be between 0 and {}",
                MAX_CLOCK_SKEW_MINUTES
            )));
        }
        self.run_mode().map(|_| ())
    }

    pub fn run_mode(&self) -> Result<RunMode> {
        match (&self.topics, &self.groups) {
            (Some(_), Some(_)) => Err(DigestError::config(
                "set either `topics` or `[[groups]]`, not both",
            )),
            (None, None) => Err(DigestError::config(
                "no topics configured: set `topics` or `[[groups]]`",
            )),
            (Some(topics), None) => {
                check_topics("default", topics)?;
                Ok(RunMode::SingleGroup {
                    topics: topics.clone(),
                    recipient_key: DEFAULT_RECIPIENT_KEY.to_string(),
                })
            }
            (None, Some(groups)) => {
                if groups.is_empty() {
                    return Err(DigestError::config("`groups` is empty"));
                }
                let mut names = HashSet::new();
                let mut resolved = Vec::with_capacity(groups.len());
                for group in groups {
                    let name = group.name.trim();
                    if name.is_empty() {
                        return Err(DigestError::config("group name must not be blank"));
                    }
                    if !names.insert(name.to_lowercase()) {
                        return Err(DigestError::config(format!("duplicate group name '{}'", name)));
                    }
                    check_topics(name, &group.topics)?;
                    resolved.push(TopicGroup {
                        name: name.to_string(),
                        topics: group.topics.clone(),
                        recipient_key: group.recipient_key(),
                    });
                }
                Ok(RunMode::MultiGroup(resolved))
            }
        }
    }

    pub fn sources(&self) -> Vec<FeedSource> {
        self.feeds.iter().map(FeedSource::from).collect()
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            lookback_hours: self.lookback_hours,
            undated: self.undated,
            clock_skew: chrono::Duration::minutes(
                self.clock_skew_minutes.clamp(0, MAX_CLOCK_SKEW_MINUTES),
            ),
            max_excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    /// Fallback bullets carry the whole excerpt, so they must fit a scraped one.
    pub fn summary_fallback_chars(&self) -> usize {
        if self.scrape.enabled {
            self.scrape.max_chars.max(DEFAULT_FALLBACK_CHARS)
        } else {
            DEFAULT_FALLBACK_CHARS
        }
    }

    /// A fresh policy per call so each stage keeps its own backoff state.
    pub fn pacing_policy(&self) -> Arc<dyn PacingPolicy> {
        let base = Duration::from_millis(self.pacing.delay_ms);
        match self.pacing.strategy {
            PacingStrategy::Fixed => Arc::new(FixedDelay::new(base)),
            PacingStrategy::Backoff => Arc::new(BackoffPacing::new(
                base,
                Duration::from_millis(self.pacing.max_delay_ms.max(self.pacing.delay_ms)),
            )),
        }
    }

    /// Build the model client, reading the API key from the environment.
    pub fn model_client(&self) -> Result<ChatCompletionsClient> {
        let api_key = std::env::var(&self.model.api_key_env).map_err(|_| {
            DigestError::config(format!("{} is not set", self.model.api_key_env))
        })?;
        ChatCompletionsClient::new(
            &self.model.base_url,
            api_key,
            &self.model.name,
            Duration::from_secs(self.model.timeout_secs),
        )
    }
}

fn check_topics(group: &str, topics: &[String]) -> Result<()> {
    if topics.iter().all(|topic| topic.trim().is_empty()) {
        return Err(DigestError::config(format!(
            "group '{}' has no topics",
            group
        )));
    }
    Ok(())
}
