//! Title and readable-text extraction from rendered HTML.

use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never part of the readable content.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Extract a title and readable text from an HTML document.
#[must_use]
pub fn extract_metadata(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    (extract_title(&document), extract_text(&document))
}

fn extract_title(document: &Html) -> Option<String> {
    for (selector, attr) in [
        ("meta[property='og:title']", Some("content")),
        ("meta[name='twitter:title']", Some("content")),
        ("title", None),
    ] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let value = match attr {
            Some(attr) => element.value().attr(attr).unwrap_or_default().to_string(),
            None => element.text().collect(),
        };
        let trimmed = clean_text(&value);
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }

    None
}

/// Readable text of the first non-empty `article`, `main` or `body`.
fn extract_text(document: &Html) -> String {
    for tag in ["article", "main", "body"] {
        let Ok(selector) = Selector::parse(tag) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = visible_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }

    String::new()
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    clean_text(&parts.join(" "))
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
