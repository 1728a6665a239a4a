/// Text processing utilities
pub mod text {
    use scraper::Html;

    /// Cut `text` to at most `max_chars` characters, never splitting a char.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    /// Collapse runs of whitespace into single spaces.
    pub fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Feed summaries frequently carry markup; keep only the visible text.
    pub fn strip_html(fragment: &str) -> String {
        if !fragment.contains('<') && !fragment.contains('&') {
            return normalize_whitespace(fragment);
        }
        let parsed = Html::parse_fragment(fragment);
        let joined = parsed.root_element().text().collect::<Vec<_>>().join(" ");
        normalize_whitespace(&joined)
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Dedup key for an article link. Scheme and host case, fragments,
    /// `utm_*` tracking parameters and a trailing slash on non-root paths
    /// do not distinguish articles. Unparseable links are used trimmed as-is.
    pub fn canonicalize(link: &str) -> String {
        let trimmed = link.trim();
        let mut url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(_) => return trimmed.to_string(),
        };

        url.set_fragment(None);

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !key.starts_with("utm_"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        url.to_string()
    }
}
