pub mod cache;
pub mod collector;
pub mod config;
pub mod fetcher;
pub mod llm_adapter;
pub mod pacing;
pub mod parser;
pub mod pipeline;
pub mod response;
pub mod stages;
pub mod traits;
pub mod types;
pub mod utils;

pub use cache::ArticleCache;
pub use collector::{CollectOptions, FeedCollector, FetchOutcome, UndatedPolicy};
pub use config::{DigestConfig, RunMode};
pub use fetcher::Fetcher;
pub use llm_adapter::{ChatCompletionsClient, CompletionRequest, MockModelClient, ModelClient};
pub use pacing::{BackoffPacing, BatchOutcome, FixedDelay, NoPacing, PacingPolicy};
pub use parser::FeedParser;
pub use pipeline::{DeliveryStatus, DigestPipeline, GroupReport, ResolvedGroup, RunPhase, RunReport};
pub use response::ModelResponse;
pub use traits::FeedTransport;
pub use types::*;
