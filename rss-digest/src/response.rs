use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Outcome of reading a model's free-form reply. Stages decide what an
/// `Unparseable` reply means for their articles; it is never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse<T> {
    Parsed(T),
    Unparseable(String),
}

impl<T> ModelResponse<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            ModelResponse::Parsed(value) => Some(value),
            ModelResponse::Unparseable(_) => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ModelResponse::Parsed(_))
    }
}

/// Find the first bracket-balanced `[...]` in `raw` that deserializes as a
/// `Vec<T>`. Prose, code fences and index tags around the payload are skipped.
pub fn parse_json_array<T: DeserializeOwned>(raw: &str) -> ModelResponse<Vec<T>> {
    for (start, _) in raw.match_indices('[') {
        let Some(len) = balanced_len(&raw[start..]) else {
            continue;
        };
        if let Ok(items) = serde_json::from_str::<Vec<T>>(&raw[start..start + len]) {
            return ModelResponse::Parsed(items);
        }
    }
    ModelResponse::Unparseable(raw.to_string())
}

/// Byte length of the bracketed span starting at `s[0] == '['`, honouring
/// JSON string literals and escapes. `None` if the brackets never close.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn index_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("index tag pattern is valid"))
}

/// Split `[1] ... [2] ...` style output into `ordinal -> block text`.
/// Text before the first tag is ignored; the first block for an ordinal wins.
pub fn split_index_sections(raw: &str) -> BTreeMap<usize, String> {
    let tags: Vec<(usize, usize, usize)> = index_tag()
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let ordinal = caps.get(1)?.as_str().parse().ok()?;
            Some((ordinal, whole.start(), whole.end()))
        })
        .collect();

    let mut sections = BTreeMap::new();
    for (i, &(ordinal, _, body_start)) in tags.iter().enumerate() {
        let body_end = tags.get(i + 1).map(|&(_, start, _)| start).unwrap_or(raw.len());
        sections
            .entry(ordinal)
            .or_insert_with(|| raw[body_start..body_end].trim().to_string());
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        id: usize,
        score: u8,
    }

    #[test]
    fn extracts_array_wrapped_in_prose() {
        let raw = "Sure! Here are the scores:\n```json\n[{\"id\": 1, \"score\": 8}, {\"id\": 2, \"score\": 3}]\n```\nLet me know.";
        let parsed = parse_json_array::<Score>(raw).parsed().expect("array present");
        assert_eq!(parsed, vec![Score { id: 1, score: 8 }, Score { id: 2, score: 3 }]);
    }

    #[test]
    fn skips_bracketed_text_that_is_not_the_payload() {
        let raw = "For [1] and [2]: [{\"id\": 2, \"score\": 9}]";
        let parsed = parse_json_array::<Score>(raw).parsed().expect("array present");
        assert_eq!(parsed, vec![Score { id: 2, score: 9 }]);
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_matching() {
        let raw = r#"[{"id": 1, "score": 7, "note": "see ]["}]"#;
        assert!(parse_json_array::<Score>(raw).is_parsed());
    }

    #[test]
    fn garbage_is_unparseable_with_raw_text_kept() {
        let raw = "I cannot help with that [";
        assert_eq!(
            parse_json_array::<Score>(raw),
            ModelResponse::Unparseable(raw.to_string())
        );
    }

    #[test]
    fn splits_on_index_tags() {
        let raw = "Here you go\n[1]\n• a\n• b\n[2]\n• c\n[1]\n• ignored";
        let sections = split_index_sections(raw);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[&1], "• a\n• b");
        assert_eq!(sections[&2], "• c");
    }
}
