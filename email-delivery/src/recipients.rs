use interfaces::defs::RecipientResolver;
use std::collections::HashMap;

/// Split a recipient list on `,` and `;`, trimming whitespace and dropping
/// empty entries.
pub fn parse_recipient_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads each key as an environment variable holding a recipient list.
#[derive(Debug, Clone, Default)]
pub struct EnvRecipientResolver;

impl RecipientResolver for EnvRecipientResolver {
    fn resolve(&self, key: &str) -> Option<Vec<String>> {
        let raw = std::env::var(key).ok()?;
        let recipients = parse_recipient_list(&raw);
        (!recipients.is_empty()).then_some(recipients)
    }
}

/// Fixed key to recipients mapping.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipientResolver {
    entries: HashMap<String, Vec<String>>,
}

impl StaticRecipientResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, raw_list: &str) -> Self {
        self.entries.insert(key.into(), parse_recipient_list(raw_list));
        self
    }
}

impl RecipientResolver for StaticRecipientResolver {
    fn resolve(&self, key: &str) -> Option<Vec<String>> {
        self.entries
            .get(key)
            .filter(|recipients| !recipients.is_empty())
            .cloned()
    }
}
