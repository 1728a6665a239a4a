use crate::types::{DigestError, ParsedEntry, ParsedFeed, Result};
use feed_rs::parser;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Parse an RSS or Atom document. Entries without any link are skipped
    /// since the link is the only stable identity an entry has downstream.
    pub fn parse_feed(content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| DigestError::FeedParse(format!("Failed to parse feed: {}", e)))?;

        let title = feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());

        let total = feed.entries.len();
        let entries: Vec<ParsedEntry> = feed
            .entries
            .into_iter()
            .filter_map(Self::parse_entry)
            .collect();

        if entries.len() < total {
            debug!("Skipped {} entries without a link", total - entries.len());
        }

        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let url = entry
            .links
            .iter()
            .map(|link| link.href.trim())
            .find(|href| !href.is_empty())?
            .to_string();

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No title".to_string());

        // Prefer the summary; Atom feeds sometimes only carry content.
        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body));

        let published_at = entry.published.or(entry.updated);

        Some(ParsedEntry {
            url,
            title,
            description,
            published_at,
        })
    }
}
