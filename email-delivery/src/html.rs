use anyhow::Result;
use interfaces::defs::{Article, DigestAssembler, GroupDigest, RenderedDigest};
use std::fmt::Write;

pub const DEFAULT_SUBJECT_PREFIX: &str = "AI Research Digest";

/// Renders a group digest as the mobile-friendly HTML email.
#[derive(Debug, Clone)]
pub struct HtmlDigestAssembler {
    subject_prefix: String,
}

impl HtmlDigestAssembler {
    pub fn new(subject_prefix: impl Into<String>) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
        }
    }

    /// `"{prefix} - {group} - {YYYY-MM-DD}"`; the default group is left out.
    pub fn subject(&self, digest: &GroupDigest) -> String {
        let date = digest.generated_on.format("%Y-%m-%d");
        if digest.is_default_group {
            format!("{} - {}", self.subject_prefix, date)
        } else {
            format!("{} - {} - {}", self.subject_prefix, digest.group, date)
        }
    }

    pub fn render(&self, digest: &GroupDigest) -> String {
        let today = digest.generated_on.format("%B %d, %Y");
        let topics = digest
            .topics
            .iter()
            .map(|topic| escape(topic))
            .collect::<Vec<_>>()
            .join(" &nbsp;|&nbsp; ");
        let heading = if digest.is_default_group {
            escape(&self.subject_prefix)
        } else {
            format!("{} &middot; {}", escape(&self.subject_prefix), escape(&digest.group))
        };

        let mut html = String::with_capacity(4096);
        let _ = write!(
            html,
            r#"<html>
<body style="font-family: Arial, sans-serif; max-width: 720px; margin: 0 auto; padding: 20px; color: #333; background: #fff;">
  <div style="background: #1a1a2e; padding: 25px; border-radius: 8px; margin-bottom: 20px;">
    <h1 style="color: #fff; margin: 0; font-size: 24px;">{heading}</h1>
    <p style="color: #aac4e8; margin: 8px 0 0 0; font-size: 14px;">{today} &nbsp;·&nbsp; {count} articles found</p>
  </div>
  <p style="color: #666; font-size: 13px; padding: 0 5px;">Topics: <em>{topics}</em></p>
  <hr style="border: none; border-top: 1px solid #eee; margin: 15px 0;">
"#,
            count = digest.articles.len(),
        );

        if digest.articles.is_empty() {
            html.push_str(
                r#"  <p style="padding: 20px; color: #888;">No relevant articles found today. Check back tomorrow!</p>
"#,
            );
        } else {
            for article in &digest.articles {
                render_card(&mut html, article);
            }
        }

        html.push_str(
            r#"  <hr style="border: none; border-top: 1px solid #eee; margin-top: 30px;">
  <p style="color: #bbb; font-size: 11px; text-align: center; padding: 10px 0;">
    Generated by RSS Research Digest
  </p>
</body>
</html>"#,
        );
        html
    }
}

impl Default for HtmlDigestAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_PREFIX)
    }
}

impl DigestAssembler for HtmlDigestAssembler {
    fn assemble(&self, digest: &GroupDigest) -> Result<RenderedDigest> {
        Ok(RenderedDigest {
            group: digest.group.clone(),
            generated_on: digest.generated_on,
            subject: self.subject(digest),
            html: self.render(digest),
        })
    }
}

/// Left-border colour for a relevance score.
pub fn score_color(score: u8) -> &'static str {
    match score {
        9.. => "#28a745",
        7..=8 => "#4a90d9",
        _ => "#fd7e14",
    }
}

fn sentiment_badge(article: &Article) -> String {
    let Some(sentiment) = article.sentiment else {
        return String::new();
    };
    let color = match sentiment {
        interfaces::defs::Sentiment::Positive => "#28a745",
        interfaces::defs::Sentiment::Negative => "#dc3545",
        interfaces::defs::Sentiment::Neutral => "#6c757d",
    };
    format!(
        r#" &nbsp;·&nbsp; <span style="color: {color}; font-weight: bold;">{}</span>"#,
        sentiment.label()
    )
}

fn render_card(html: &mut String, article: &Article) {
    let score = article.relevance_score.unwrap_or(0);
    let bullets = article
        .bullets
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|bullet| format!("&#8226; {}", escape(bullet)))
        .collect::<Vec<_>>()
        .join("<br>");

    let _ = write!(
        html,
        r#"  <div style="margin: 20px 0; padding: 18px; border-left: 4px solid {color}; background: #f8f9fa; border-radius: 0 6px 6px 0;">
    <h3 style="margin: 0 0 6px 0; font-size: 16px; line-height: 1.4;">
      <a href="{link}" style="color: #1a1a2e; text-decoration: none;">{title}</a>
    </h3>
    <p style="color: #999; font-size: 12px; margin: 0 0 10px 0;">
      {source} &nbsp;·&nbsp; {published} &nbsp;·&nbsp; Relevance: {score}/10{badge}
    </p>
    <div style="font-size: 14px; line-height: 1.7; color: #444;">
      {bullets}
    </div>
  </div>
"#,
        color = score_color(score),
        link = escape(&article.link),
        title = escape(&article.title),
        source = escape(&article.source),
        published = article.published,
        badge = sentiment_badge(article),
    );
}

/// Escape text for use in element content and double-quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
