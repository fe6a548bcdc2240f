//! HTML link extraction
//!
//! This module mines a fetched page for:
//! - Internal links to follow (same host, page-like URLs)
//! - PDF candidates, found by several methods with different confidences

use crate::crawler::structured::extract_structured_pdfs;
use crate::state::ExtractionMethod;
use crate::url::{dedup_key, is_non_page_asset, is_pdf_url, same_site};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use url::Url;

/// Confidence of an `<a href>` pointing straight at a PDF
pub const SELECTOR_CONFIDENCE: f64 = 0.9;
/// Confidence of a PDF URL found anywhere in the raw HTML
pub const REGEX_CONFIDENCE: f64 = 0.7;
/// Confidence of a PDF URL found inside a script body
pub const SCRIPT_CONFIDENCE: f64 = 0.6;
/// Confidence of a PDF URL declared in structured metadata
pub const STRUCTURED_CONFIDENCE: f64 = 0.8;

/// Absolute http(s) URL ending in `.pdf`, anywhere in a document
pub(crate) fn pdf_url_regex() -> &'static Regex {
    static PDF_URL: OnceLock<Regex> = OnceLock::new();
    PDF_URL.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s"'<>]+?\.pdf\b"#).expect("PDF URL pattern is valid")
    })
}

/// A link that probably points at a PDF document
#[derive(Debug, Clone, PartialEq)]
pub struct PdfCandidate {
    pub url: String,
    pub source_url: Option<String>,
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

impl PdfCandidate {
    pub fn new(
        url: impl Into<String>,
        source_url: Option<String>,
        method: ExtractionMethod,
        confidence: f64,
    ) -> Self {
        Self {
            url: url.into(),
            source_url,
            method,
            confidence,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Adds a metadata field, turning the metadata into an object if needed
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Everything mined from one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Absolute same-site page URLs, in document order
    pub internal_links: Vec<String>,
    /// PDF candidates, deduplicated by normalized URL
    pub pdf_candidates: Vec<PdfCandidate>,
}

/// Extracts links and PDF candidates from fetched content
pub trait LinkExtractor: Send + Sync {
    fn extract(&self, content: &str, source_url: &Url) -> Extraction;
}

/// Extractor for HTML pages
#[derive(Debug, Clone)]
pub struct HtmlLinkExtractor {
    max_links_per_page: usize,
}

impl HtmlLinkExtractor {
    pub fn new(max_links_per_page: usize) -> Self {
        Self { max_links_per_page }
    }
}

impl Default for HtmlLinkExtractor {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Keeps one candidate per normalized URL, with the highest confidence
#[derive(Default)]
struct CandidateSet {
    candidates: Vec<PdfCandidate>,
    index: HashMap<String, usize>,
}

impl CandidateSet {
    fn add(&mut self, url: &str, source: &Url, method: ExtractionMethod, confidence: f64) {
        let key = match dedup_key(url) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("Dropping malformed PDF candidate {}: {}", url, e);
                return;
            }
        };

        match self.index.get(&key) {
            Some(&i) => {
                if confidence > self.candidates[i].confidence {
                    self.candidates[i].method = method;
                    self.candidates[i].confidence = confidence;
                }
            }
            None => {
                self.index.insert(key, self.candidates.len());
                self.candidates.push(PdfCandidate::new(
                    url,
                    Some(source.to_string()),
                    method,
                    confidence,
                ));
            }
        }
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    /// Extracts internal links and PDF candidates from an HTML page
    ///
    /// # Extraction Methods
    ///
    /// | Method | Source | Confidence |
    /// |--------|--------|------------|
    /// | structural-selector | `<a href>` ending in `.pdf` | 0.9 |
    /// | structured-metadata | JSON-LD and microdata | 0.8 |
    /// | pattern-match | absolute `.pdf` URLs anywhere in the HTML | 0.7 |
    /// | script-scan | absolute `.pdf` URLs inside `<script>` | 0.6 |
    ///
    /// # Internal Links
    ///
    /// Same host only. `javascript:`, `mailto:`, `tel:` and `data:` links,
    /// fragment-only links and static assets are skipped. At most
    /// `max_links_per_page` links are returned.
    fn extract(&self, content: &str, source_url: &Url) -> Extraction {
        let document = Html::parse_document(content);
        let mut pdfs = CandidateSet::default();
        let mut internal_links = Vec::new();
        let mut seen_links = HashSet::new();

        if let Ok(a_selector) = Selector::parse("a[href]") {
            for element in document.select(&a_selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let Some(absolute) = resolve_link(href, source_url) else {
                    continue;
                };

                if is_pdf_url(&absolute) {
                    pdfs.add(
                        absolute.as_str(),
                        source_url,
                        ExtractionMethod::StructuralSelector,
                        SELECTOR_CONFIDENCE,
                    );
                    continue;
                }

                if internal_links.len() >= self.max_links_per_page
                    || !same_site(&absolute, source_url)
                    || is_non_page_asset(&absolute)
                {
                    continue;
                }

                let mut link = absolute;
                link.set_fragment(None);
                if seen_links.insert(link.to_string()) {
                    internal_links.push(link.to_string());
                }
            }
        }

        for url in extract_structured_pdfs(&document, source_url) {
            pdfs.add(
                &url,
                source_url,
                ExtractionMethod::StructuredMetadata,
                STRUCTURED_CONFIDENCE,
            );
        }

        for m in pdf_url_regex().find_iter(content) {
            pdfs.add(
                m.as_str(),
                source_url,
                ExtractionMethod::PatternMatch,
                REGEX_CONFIDENCE,
            );
        }

        if let Ok(script_selector) = Selector::parse("script:not([type=\"application/ld+json\"])") {
            for script in document.select(&script_selector) {
                // Inline JSON escapes slashes
                let body = script.text().collect::<String>().replace("\\/", "/");
                for m in pdf_url_regex().find_iter(&body) {
                    pdfs.add(
                        m.as_str(),
                        source_url,
                        ExtractionMethod::ScriptScan,
                        SCRIPT_CONFIDENCE,
                    );
                }
            }
        }

        Extraction {
            internal_links,
            pdf_candidates: pdfs.candidates,
        }
    }
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("https://example.com/search/page").unwrap()
    }

    fn extract(html: &str) -> Extraction {
        HtmlLinkExtractor::default().extract(html, &base_url())
    }

    #[test]
    fn test_structural_pdf_link() {
        let html = r#"<html><body><a href="/docs/a.pdf">A</a></body></html>"#;
        let extraction = extract(html);
        assert_eq!(extraction.pdf_candidates.len(), 1);
        let candidate = &extraction.pdf_candidates[0];
        assert_eq!(candidate.url, "https://example.com/docs/a.pdf");
        assert_eq!(candidate.method, ExtractionMethod::StructuralSelector);
        assert_eq!(candidate.confidence, SELECTOR_CONFIDENCE);
        assert_eq!(
            candidate.source_url.as_deref(),
            Some("https://example.com/search/page")
        );
        assert!(extraction.internal_links.is_empty());
    }

    #[test]
    fn test_highest_confidence_wins() {
        // The absolute href is also matched by the raw-HTML regex
        let html = r#"<a href="https://example.com/docs/a.pdf">A</a>
                      <script>var u = "https://example.com/docs/a.pdf";</script>"#;
        let extraction = extract(html);
        assert_eq!(extraction.pdf_candidates.len(), 1);
        assert_eq!(
            extraction.pdf_candidates[0].method,
            ExtractionMethod::StructuralSelector
        );
    }

    #[test]
    fn test_regex_and_script_methods() {
        let html = r#"<p>See https://example.com/docs/text.pdf for details</p>
                      <script>load('https://cdn.example.com/js/only.pdf');</script>"#;
        let extraction = extract(html);
        let methods: Vec<_> = extraction
            .pdf_candidates
            .iter()
            .map(|c| (c.url.as_str(), c.method))
            .collect();
        // Both are found by the raw regex first; script scan has lower confidence
        assert!(methods.contains(&(
            "https://example.com/docs/text.pdf",
            ExtractionMethod::PatternMatch
        )));
        assert!(methods.contains(&(
            "https://cdn.example.com/js/only.pdf",
            ExtractionMethod::PatternMatch
        )));
    }

    #[test]
    fn test_script_scan_unescapes_json_urls() {
        let html = r#"<script>var cfg = {"doc":"https:\/\/example.com\/docs\/s.pdf"};</script>"#;
        let extraction = extract(html);
        assert_eq!(extraction.pdf_candidates.len(), 1);
        assert_eq!(
            extraction.pdf_candidates[0].url,
            "https://example.com/docs/s.pdf"
        );
        assert_eq!(
            extraction.pdf_candidates[0].method,
            ExtractionMethod::ScriptScan
        );
    }

    #[test]
    fn test_json_ld_candidate() {
        let html = r#"<script type="application/ld+json">{"contentUrl":"https://example.com/ld.pdf"}</script>"#;
        let extraction = extract(html);
        assert_eq!(extraction.pdf_candidates.len(), 1);
        assert_eq!(
            extraction.pdf_candidates[0].method,
            ExtractionMethod::StructuredMetadata
        );
    }

    #[test]
    fn test_candidates_dedup_by_normalized_url() {
        let html = r#"<a href="/docs/a.pdf">A</a>
                      <a href="/docs/a.pdf#page=2">A again</a>
                      <a href="http://example.com/docs/a.pdf?utm_source=x">tracked</a>"#;
        assert_eq!(extract(html).pdf_candidates.len(), 1);
    }

    #[test]
    fn test_internal_links_same_host_only() {
        let html = r##"<a href="/next">Next</a>
                      <a href="https://other.com/page">Other</a>
                      <a href="/img/logo.png">Logo</a>
                      <a href="mailto:a@example.com">Mail</a>
                      <a href="javascript:void(0)">JS</a>
                      <a href="#top">Top</a>
                      <a href="/next#frag">Next again</a>"##;
        let extraction = extract(html);
        assert_eq!(extraction.internal_links, vec!["https://example.com/next"]);
    }

    #[test]
    fn test_internal_links_capped() {
        let html: String = (0..10)
            .map(|i| format!(r#"<a href="/p/{}">{}</a>"#, i, i))
            .collect();
        let extraction = HtmlLinkExtractor::new(3).extract(&html, &base_url());
        assert_eq!(extraction.internal_links.len(), 3);
    }

    #[test]
    fn test_relative_link_resolution() {
        let html = r#"<a href="other">Other</a>"#;
        let extraction = extract(html);
        assert_eq!(
            extraction.internal_links,
            vec!["https://example.com/search/other"]
        );
    }

    #[test]
    fn test_with_meta() {
        let candidate = PdfCandidate::new("https://x/a.pdf", None, ExtractionMethod::Sitemap, 1.0)
            .with_meta("strategy", "sitemap");
        assert_eq!(candidate.metadata["strategy"], "sitemap");
    }
}
