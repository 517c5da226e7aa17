//! Availability detection and best-effort event metadata extraction.
//!
//! Availability is a plain case-insensitive phrase match over the visible
//! page text. Metadata is advisory and never influences the signal.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

/// Phrases whose presence means listings are up.
const SIGNAL_PHRASES: &[&str] = &[
    "ticket available",
    "tickets available",
    "listing available",
    "listings available",
];

const MAX_DATE_TEXT_LEN: usize = 40;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements whose text never runs into their neighbours'.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "title",
    "tr", "ul",
];

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d{1,2}\s+[A-Za-z]+\s+\d{4}",
        r"[A-Za-z]+\s+\d{1,2}(st|nd|rd|th)?\s+\d{4}",
        r"\d{1,2}/\d{1,2}/\d{2,4}",
        r"\d{1,2}-\d{1,2}-\d{2,4}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub signal_present: bool,
    pub name: Option<String>,
    pub date: Option<String>,
}

pub trait SignalDetector: Send + Sync {
    fn detect(&self, content: &str) -> Detection;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhraseSignalDetector;

impl SignalDetector for PhraseSignalDetector {
    fn detect(&self, content: &str) -> Detection {
        let document = Html::parse_document(content);
        let text = visible_text(&document).to_lowercase();
        Detection {
            signal_present: SIGNAL_PHRASES.iter().any(|p| text.contains(p)),
            name: extract_event_name(&document),
            date: extract_event_date(&document),
        }
    }
}

/// Text of the document outside script and style blocks, whitespace collapsed.
///
/// Inline markup joins without a gap, so `<b>Ticket</b>s` reads `Tickets`.
fn visible_text(document: &Html) -> String {
    let mut text = String::new();
    push_visible_text(document.root_element(), &mut text);
    normalise_whitespace(&text)
}

fn push_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if HIDDEN_ELEMENTS.contains(&name) {
            continue;
        }
        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            out.push(' ');
        }
        push_visible_text(child, out);
        if block {
            out.push(' ');
        }
    }
}

fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    normalise_whitespace(&element.text().collect::<String>())
}

fn select_all<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => document.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn extract_event_name(document: &Html) -> Option<String> {
    if let Some(h1) = select_all(document, "h1").into_iter().next() {
        if let Some(name) = non_empty(element_text(h1)) {
            return Some(name);
        }
    }

    let heading = select_all(document, "h2, h3")
        .into_iter()
        .map(element_text)
        .find(|text| {
            let lower = text.to_lowercase();
            text.chars().count() > 5 && !lower.contains("faq") && !lower.contains("similar")
        });
    if heading.is_some() {
        return heading;
    }

    if let Some(name) = json_ld_field(document, "name") {
        return Some(name);
    }

    select_all(document, r#"meta[property="og:title"]"#)
        .into_iter()
        .find_map(|meta| meta.value().attr("content").map(str::to_string))
        .and_then(non_empty)
}

fn extract_event_date(document: &Html) -> Option<String> {
    if let Some(el) = select_all(document, ".event-date, .date, time")
        .into_iter()
        .next()
    {
        let text = non_empty(element_text(el))
            .or_else(|| el.value().attr("datetime").map(str::to_string));
        if text.is_some() {
            return text;
        }
    }

    let short_date = select_all(document, "p, span, div")
        .into_iter()
        .map(element_text)
        .find(|text| {
            !text.is_empty()
                && text.chars().count() < MAX_DATE_TEXT_LEN
                && DATE_PATTERNS.iter().any(|re| re.is_match(text))
        });
    if short_date.is_some() {
        return short_date;
    }

    json_ld_field(document, "startDate")
}

/// First string value for `key` in the first parseable JSON-LD block.
fn json_ld_field(document: &Html, key: &str) -> Option<String> {
    select_all(document, r#"script[type="application/ld+json"]"#)
        .into_iter()
        .filter_map(|script| serde_json::from_str::<Value>(&script.text().collect::<String>()).ok())
        .find_map(|value| find_string(&value, key))
        .and_then(non_empty)
}

fn find_string(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| map.values().find_map(|v| find_string(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_string(v, key)),
        _ => None,
    }
}
