//! Structured metadata extraction
//!
//! Court portals often describe documents with JSON-LD (`contentUrl`,
//! `encoding`, `url`, ...) or microdata attributes. Any absolute PDF URL found
//! anywhere in those blocks is a candidate.

use crate::url::is_pdf_url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Collects PDF URLs from JSON-LD blocks and microdata attributes
pub fn extract_structured_pdfs(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    if let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        for script in document.select(&selector) {
            let raw = script.text().collect::<String>();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => collect_urls(&value, &mut |candidate| {
                    push_pdf(candidate, base_url, &mut seen, &mut urls)
                }),
                Err(e) => tracing::debug!("Skipping malformed JSON-LD on {}: {}", base_url, e),
            }
        }
    }

    if let Ok(selector) = Selector::parse("[itemprop]") {
        for element in document.select(&selector) {
            for attr in ["href", "src", "content"] {
                if let Some(value) = element.value().attr(attr) {
                    push_pdf(value, base_url, &mut seen, &mut urls);
                }
            }
        }
    }

    urls
}

fn push_pdf(candidate: &str, base_url: &Url, seen: &mut HashSet<String>, urls: &mut Vec<String>) {
    let Ok(resolved) = base_url.join(candidate.trim()) else {
        return;
    };
    if (resolved.scheme() == "http" || resolved.scheme() == "https")
        && is_pdf_url(&resolved)
        && seen.insert(resolved.to_string())
    {
        urls.push(resolved.to_string());
    }
}

/// Walks every string in a JSON value that looks like an absolute URL
fn collect_urls(value: &Value, sink: &mut dyn FnMut(&str)) {
    match value {
        Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => sink(s),
        Value::Array(items) => items.iter().for_each(|item| collect_urls(item, sink)),
        Value::Object(map) => map.values().for_each(|item| collect_urls(item, sink)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Vec<String> {
        let base = Url::parse("https://example.com/search/").unwrap();
        extract_structured_pdfs(&Html::parse_document(html), &base)
    }

    #[test]
    fn test_json_ld_nested_urls() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@type": "Legislation", "url": "https://example.com/case/1",
             "encoding": [{"contentUrl": "https://example.com/docs/1.pdf"}],
             "workExample": {"url": "https://example.com/docs/2.PDF"}}
        </script></head></html>"#;
        assert_eq!(
            extract(html),
            vec![
                "https://example.com/docs/1.pdf".to_string(),
                "https://example.com/docs/2.PDF".to_string()
            ]
        );
    }

    #[test]
    fn test_malformed_json_ld_is_ignored() {
        let html = r#"<script type="application/ld+json">{not json</script>"#;
        assert!(extract(html).is_empty());
    }

    #[test]
    fn test_microdata_attributes() {
        let html = r#"<div itemscope itemtype="https://schema.org/DigitalDocument">
            <a itemprop="url" href="files/ruling.pdf">Ruling</a>
            <meta itemprop="name" content="Ruling 12/2020">
        </div>"#;
        assert_eq!(
            extract(html),
            vec!["https://example.com/search/files/ruling.pdf".to_string()]
        );
    }
}
