use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Publish date of a feed entry. Entries whose timestamp could not be read
/// carry `Unknown` instead of being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Published {
    Date(NaiveDate),
    Unknown,
}

impl fmt::Display for Published {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Published::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Published::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Lenient label matching for model output. Anything unrecognized is `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }
}

/// An item moving through the pipeline. Later stages only ever add fields;
/// `relevance_score`, `bullets` and `sentiment` stay `None` until the stage
/// that owns them has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub identifier: String,
    pub link: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub published: Published,
    pub relevance_score: Option<u8>,
    pub bullets: Option<Vec<String>>,
    pub sentiment: Option<Sentiment>,
}

impl Article {
    pub fn new(
        identifier: impl Into<String>,
        link: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        source: impl Into<String>,
        published: Published,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            link: link.into(),
            title: title.into(),
            summary: summary.into(),
            source: source.into(),
            published,
            relevance_score: None,
            bullets: None,
            sentiment: None,
        }
    }
}

/// A named set of topics and the key used to look up who receives its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicGroup {
    pub name: String,
    pub topics: Vec<String>,
    pub recipient_key: String,
}

/// Finished output of one group's run, ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDigest {
    pub group: String,
    pub topics: Vec<String>,
    pub articles: Vec<Article>,
    pub generated_on: NaiveDate,
    /// True for the synthesized group of single-user mode.
    pub is_default_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDigest {
    pub group: String,
    pub generated_on: NaiveDate,
    pub subject: String,
    pub html: String,
}

/// Maps a group's recipient key to delivery addresses.
pub trait RecipientResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Vec<String>>;
}

/// Turns a finished group digest into something a delivery channel can send.
pub trait DigestAssembler: Send + Sync {
    fn assemble(&self, digest: &GroupDigest) -> anyhow::Result<RenderedDigest>;
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn channel_name(&self) -> String;

    async fn deliver(&self, digest: &RenderedDigest, recipients: &[String]) -> anyhow::Result<()>;
}
