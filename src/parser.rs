//! Lenient RSS 2.0 item extraction.
//!
//! This is a tag scanner, not an XML parser: each field is the text of the
//! first matching element inside an `<item>` block. Nested elements of the
//! same name, self-closing tags and attribute data (other than
//! `media:content url`) are not understood.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The document has no `<rss>...</rss>` wrapper
    #[error("Invalid RSS format: no <rss> root element")]
    MissingRssRoot,
}

/// Fields pulled out of one `<item>` block before normalization.
///
/// Absent tags leave the field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub description: String,
    /// `content:encoded`, falling back to `description`
    pub content: String,
    pub link: String,
    pub pub_date: String,
    /// `dc:creator`, falling back to `creator` then `author`
    pub author: String,
    /// `guid`, falling back to `link`
    pub guid: String,
    pub categories: Vec<String>,
    /// `url` attribute of the first `media:content` element
    pub media_url: String,
}

const ENTITIES: [(&str, &str); 7] = [
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#039;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
];

static RSS_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<rss(?:\s[^>]*)?>(.*?)</rss>").expect("valid regex"));

static ITEM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item>").expect("valid regex"));

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static ENTITY_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&[^;]+;").expect("valid regex"));

static MEDIA_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<media:content\s[^>]*?\burl\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

struct ItemPatterns {
    title: Regex,
    description: Regex,
    content_encoded: Regex,
    link: Regex,
    pub_date: Regex,
    dc_creator: Regex,
    creator: Regex,
    author: Regex,
    guid: Regex,
    category: Regex,
}

static ITEM_PATTERNS: LazyLock<ItemPatterns> = LazyLock::new(|| ItemPatterns {
    title: element_pattern("title"),
    description: element_pattern("description"),
    content_encoded: element_pattern("content:encoded"),
    link: element_pattern("link"),
    pub_date: element_pattern("pubDate"),
    dc_creator: element_pattern("dc:creator"),
    creator: element_pattern("creator"),
    author: element_pattern("author"),
    guid: element_pattern("guid"),
    category: element_pattern("category"),
});

/// Group 1 holds CDATA text, group 2 plain text.
fn element_pattern(tag: &str) -> Regex {
    let tag = regex::escape(tag);
    Regex::new(&format!(
        r"(?is)<{tag}(?:\s[^>]*)?>\s*(?:<!\[CDATA\[(.*?)\]\]>|([^<]*))\s*</{tag}>"
    ))
    .expect("valid element regex")
}

/// Extracts every `<item>` of an RSS document in document order.
pub fn parse_items(xml: &str) -> Result<Vec<RawItem>, ParseError> {
    let root = RSS_ROOT
        .captures(xml)
        .and_then(|c| c.get(1))
        .ok_or(ParseError::MissingRssRoot)?;

    let items = ITEM_BLOCK
        .captures_iter(root.as_str())
        .filter_map(|c| c.get(1))
        .map(|block| parse_item(block.as_str()))
        .collect();

    Ok(items)
}

fn parse_item(block: &str) -> RawItem {
    let p = &*ITEM_PATTERNS;

    let description = extract_text(block, &p.description);
    let link = extract_text(block, &p.link);

    let content = non_empty_or(extract_text(block, &p.content_encoded), || {
        description.clone()
    });
    let author = non_empty_or(extract_text(block, &p.dc_creator), || {
        non_empty_or(extract_text(block, &p.creator), || {
            extract_text(block, &p.author)
        })
    });
    let guid = non_empty_or(extract_text(block, &p.guid), || link.clone());

    let media_url = MEDIA_CONTENT
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .unwrap_or_default();

    RawItem {
        title: extract_text(block, &p.title),
        description,
        content,
        link,
        pub_date: extract_text(block, &p.pub_date),
        author,
        guid,
        categories: extract_categories(block),
        media_url,
    }
}

fn non_empty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}

/// Text of the first element matched by `pattern`, or an empty string.
fn extract_text(block: &str, pattern: &Regex) -> String {
    pattern
        .captures(block)
        .and_then(|c| capture_text(&c))
        .unwrap_or_default()
}

fn capture_text(captures: &regex::Captures<'_>) -> Option<String> {
    if let Some(cdata) = captures.get(1) {
        return Some(cdata.as_str().trim().to_string());
    }
    captures
        .get(2)
        .map(|text| decode_entities(text.as_str().trim()))
}

/// All non-empty `<category>` texts, in order, duplicates kept.
fn extract_categories(block: &str) -> Vec<String> {
    ITEM_PATTERNS
        .category
        .captures_iter(block)
        .filter_map(|c| capture_text(&c))
        .filter(|category| !category.is_empty())
        .collect()
}

/// Decodes the fixed entity table in a single left-to-right pass.
///
/// Anything else starting with `&` is copied through untouched, so
/// `&eacute;` survives and `&amp;lt;` becomes `&lt;`, not `<`.
pub fn decode_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        decoded.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match ENTITIES.iter().find(|(entity, _)| tail.starts_with(entity)) {
            Some((entity, replacement)) => {
                decoded.push_str(replacement);
                rest = &tail[entity.len()..];
            }
            None => {
                decoded.push('&');
                rest = &tail[1..];
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

/// Plain-text view of an HTML fragment: tags removed, then every run from
/// an `&` to the next `;` replaced by a space.
pub fn strip_html(html: &str) -> String {
    let without_tags = HTML_TAG.replace_all(html, "");
    ENTITY_LIKE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}
