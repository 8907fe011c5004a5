//! Turning fetched pages into records and follow-up links
//!
//! The [`Extractor`] trait is the pluggable strategy; [`HtmlExtractor`] is the
//! default and produces one record per HTML page with these fields:
//!
//! - `title`: text of `<title>`, or null
//! - `description`: `<meta name="description">` content, or null
//! - `headings`: text of `h1`, `h2` and `h3` elements
//! - `paragraphs`: text of `p` elements longer than 10 characters
//! - `images`: absolute `img[src]` URLs
//! - `emails`: addresses found in the page text
//! - `tables`: each table as a list of rows of cell texts
//! - `link_count`: number of links followed from the page
//! - `text`: whitespace-collapsed page text, without script and style content

use crate::crawler::fetcher::Payload;
use crate::state::Record;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use url::Url;

/// Paragraphs at or below this many characters are dropped
const MIN_PARAGRAPH_CHARS: usize = 10;

/// What an extractor produced for one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<Record>,
    /// Absolute links to consider for crawling, in document order
    pub links: Vec<String>,
    /// Set when the page could not be extracted
    pub diagnostic: Option<String>,
}

impl Extraction {
    /// An empty extraction carrying the reason nothing was produced
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            links: Vec::new(),
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Converts a fetched payload into records and links
///
/// Implementations are pure and must not panic on malformed input.
pub trait Extractor: Send + Sync {
    fn extract(&self, source: &Url, payload: &Payload) -> Extraction;
}

/// Default HTML extractor built on scraper
#[derive(Debug, Clone, Default)]
pub struct HtmlExtractor {
    link_filter: Option<String>,
}

impl HtmlExtractor {
    /// Creates an extractor
    ///
    /// When `link_filter` is set, only links containing that substring are
    /// returned for crawling.
    pub fn new(link_filter: Option<String>) -> Self {
        Self {
            link_filter: link_filter.filter(|f| !f.is_empty()),
        }
    }

    fn keep_link(&self, link: &str) -> bool {
        match &self.link_filter {
            Some(filter) => link.contains(filter.as_str()),
            None => true,
        }
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, source: &Url, payload: &Payload) -> Extraction {
        if !payload.is_html() {
            return Extraction::failed(format!(
                "Unsupported content type: {}",
                payload.content_type.as_deref().unwrap_or("unknown")
            ));
        }

        let html = payload.text();
        let document = Html::parse_document(&html);

        // Relative links resolve against the final URL after redirects
        let base = &payload.final_url;

        let links: Vec<String> = extract_links(&document, base)
            .into_iter()
            .filter(|link| self.keep_link(link))
            .collect();

        let mut fields = BTreeMap::new();
        fields.insert(
            "title".to_string(),
            extract_title(&document).map_or(Value::Null, Value::String),
        );
        fields.insert(
            "description".to_string(),
            extract_description(&document).map_or(Value::Null, Value::String),
        );
        fields.insert(
            "headings".to_string(),
            json!(select_texts(&document, "h1, h2, h3")),
        );
        fields.insert(
            "paragraphs".to_string(),
            json!(select_texts(&document, "p")
                .into_iter()
                .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
                .collect::<Vec<_>>()),
        );
        fields.insert("images".to_string(), json!(extract_images(&document, base)));
        fields.insert("emails".to_string(), json!(extract_emails(&document)));
        fields.insert("tables".to_string(), json!(extract_tables(&document)));
        fields.insert("link_count".to_string(), json!(links.len()));
        fields.insert("text".to_string(), json!(extract_text(&document)));

        let record = Record::new(source.as_str(), fields, links.clone());

        Extraction {
            records: vec![record],
            links,
            diagnostic: None,
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whitespace-collapsed text content of an element
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = selector("title")?;

    document
        .select(&title_selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

fn extract_description(document: &Html) -> Option<String> {
    let meta = selector("meta[name='description'][content]")?;
    document
        .select(&meta)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Non-empty texts of every element matching `css`, in document order
fn select_texts(document: &Html, css: &str) -> Vec<String> {
    let Some(sel) = selector(css) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .map(element_text)
        .filter(|s| !s.is_empty())
        .collect()
}

fn extract_images(document: &Html, base: &Url) -> Vec<String> {
    let Some(img) = selector("img[src]") else {
        return Vec::new();
    };
    document
        .select(&img)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .map(|url| url.to_string())
        .collect()
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok())
        .as_ref()
}

/// Distinct email addresses in the page text, in order of first appearance
fn extract_emails(document: &Html) -> Vec<String> {
    let Some(pattern) = email_pattern() else {
        return Vec::new();
    };
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");

    let mut seen = HashSet::new();
    pattern
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .filter(|email| seen.insert(email.clone()))
        .collect()
}

/// Visible text of the whole page, skipping `<script>` and `<style>` bodies
fn extract_text(document: &Html) -> String {
    let mut words = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|parent| {
            parent
                .value()
                .as_element()
                .map_or(false, |el| matches!(el.name(), "script" | "style"))
        });
        if hidden {
            continue;
        }
        words.extend(text.split_whitespace());
    }
    words.join(" ")
}

fn extract_tables(document: &Html) -> Vec<Vec<Vec<String>>> {
    let (Some(table), Some(tr), Some(cell)) = (selector("table"), selector("tr"), selector("td, th"))
    else {
        return Vec::new();
    };

    document
        .select(&table)
        .map(|t| {
            t.select(&tr)
                .map(|row| row.select(&cell).map(element_text).collect::<Vec<_>>())
                .filter(|row| !row.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|rows| !rows.is_empty())
        .collect()
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    // Extract links from <a> tags
    if let Some(a_selector) = selector("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    // Extract canonical link
    if let Some(canonical_selector) = selector("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url.to_string()),
        _ => None,
    }
}
