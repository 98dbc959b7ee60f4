use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::parser::{strip_html, RawItem};

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"'>]+)["']"#).expect("valid regex")
});

/// A normalized feed entry, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// guid, else link, else a digest of source, title and raw date
    pub id: String,
    pub title: String,
    /// Plain text, HTML stripped
    pub description: String,
    /// Body with HTML retained
    pub content: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub author: String,
    pub image: Option<String>,
    pub categories: Vec<String>,
    /// Feed URL this article was read from
    pub source: String,
}

impl Article {
    /// Normalizes a parsed item. `now` stands in for a missing or
    /// unparseable `pubDate`.
    pub fn from_raw(raw: RawItem, source: &str, now: DateTime<Utc>) -> Self {
        let id = if !raw.guid.is_empty() {
            raw.guid.clone()
        } else if !raw.link.is_empty() {
            raw.link.clone()
        } else {
            derive_id(source, &raw.title, &raw.pub_date)
        };

        let title = if raw.title.is_empty() {
            "Untitled".to_string()
        } else {
            raw.title
        };

        let description = if raw.description.is_empty() {
            strip_html(&raw.content)
        } else {
            strip_html(&raw.description)
        };

        let content = if raw.content.is_empty() {
            raw.description
        } else {
            raw.content
        };

        let author = if raw.author.is_empty() {
            "Unknown".to_string()
        } else {
            raw.author
        };

        let image = extract_image(&content, &raw.media_url);

        Self {
            id,
            title,
            description,
            content,
            link: raw.link,
            pub_date: parse_pub_date(&raw.pub_date).unwrap_or(now),
            author,
            image,
            categories: raw.categories,
            source: source.to_string(),
        }
    }

    /// Display string for `pub_date` relative to `now`.
    pub fn format_pub_date(&self, now: DateTime<Utc>) -> String {
        format_relative(self.pub_date, now)
    }
}

/// Accepts RFC 2822 (the RSS format) and RFC 3339.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn format_relative(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(date);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else if days < 7 {
        format!("{}d ago", days)
    } else if date.year() == now.year() {
        date.format("%b %-d").to_string()
    } else {
        date.format("%b %-d, %Y").to_string()
    }
}

fn extract_image(content: &str, media_url: &str) -> Option<String> {
    if let Some(src) = IMG_SRC.captures(content).and_then(|c| c.get(1)) {
        return Some(src.as_str().to_string());
    }

    if media_url.is_empty() {
        None
    } else {
        Some(media_url.to_string())
    }
}

fn derive_id(source: &str, title: &str, pub_date: &str) -> String {
    let input = format!("{}|{}|{}", source, title, pub_date);
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
