//! Search form explorer
//!
//! The site's search UI paginates shallowly, but its form endpoint accepts
//! arbitrary date ranges. Querying every jurisdiction over quarterly windows
//! reaches documents the listing pages never link.

use crate::config::SearchConfig;
use crate::crawler::PdfCandidate;
use crate::state::ExtractionMethod;
use crate::strategy::{
    pdf_links_in, DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult, UrlFilter,
};
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashSet;
use url::Url;

/// Quarterly date windows covering the last `history_years` years
///
/// Windows start on the first day of January, April, July and October and
/// span 90 days (start plus 89). Windows starting after `today` are skipped.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use cendoj_discovery::strategy::quarterly_windows;
///
/// let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
/// let windows = quarterly_windows(today, 0);
/// assert_eq!(windows.len(), 2);
/// assert_eq!(windows[1].0, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
/// assert_eq!(windows[1].1, NaiveDate::from_ymd_opt(2024, 6, 29).unwrap());
/// ```
pub fn quarterly_windows(today: NaiveDate, history_years: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let first_year = today.year() - history_years as i32;
    let mut windows = Vec::new();
    for year in first_year..=today.year() {
        for month in [1, 4, 7, 10] {
            let Some(start) = NaiveDate::from_ymd_opt(year, month, 1) else {
                continue;
            };
            if start > today {
                continue;
            }
            windows.push((start, start + ChronoDuration::days(89)));
        }
    }
    windows
}

/// Queries the search endpoint over jurisdictions and date windows
pub struct SearchExplorer {
    config: SearchConfig,
    filter: UrlFilter,
}

impl SearchExplorer {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            filter: UrlFilter::default(),
        }
    }

    fn form_fields(&self, jurisdiction: &str, start: NaiveDate, end: NaiveDate) -> Vec<(String, String)> {
        vec![
            ("jurisdiction".to_string(), jurisdiction.to_string()),
            ("startDate".to_string(), start.format("%d/%m/%Y").to_string()),
            ("endDate".to_string(), end.format("%d/%m/%Y").to_string()),
            ("max".to_string(), self.config.results_per_page.to_string()),
            ("page".to_string(), "1".to_string()),
        ]
    }
}

#[async_trait]
impl DiscoveryStrategy for SearchExplorer {
    fn name(&self) -> &'static str {
        "search"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
            && self.config.search_url.is_some()
            && !self.config.jurisdictions.is_empty()
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let mut output = StrategyOutput::default();
        let Some(search_url) = self.config.search_url.as_deref() else {
            return Ok(output);
        };
        let endpoint = ctx.resolve(search_url)?;
        let windows = quarterly_windows(Utc::now().date_naive(), self.config.history_years);
        let mut seen = HashSet::new();
        let mut queries = 0usize;

        'jurisdictions: for jurisdiction in &self.config.jurisdictions {
            for &(start, end) in &windows {
                let fields = self.form_fields(jurisdiction, start, end);
                let response = match ctx.post_form(&endpoint, fields).await {
                    Ok(response) if response.is_success() => response,
                    Ok(response) => {
                        tracing::warn!(
                            "Search for {} {}..{} returned HTTP {}",
                            jurisdiction,
                            start,
                            end,
                            response.status
                        );
                        continue;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Search for {} {}..{} failed: {}", jurisdiction, start, end, e);
                        continue;
                    }
                };
                queries += 1;

                let base = Url::parse(&response.final_url).unwrap_or_else(|_| endpoint.clone());
                for (url, confidence) in pdf_links_in(&response.body, &base) {
                    if !self.filter.allows(&url) || !seen.insert(url.clone()) {
                        continue;
                    }
                    output.pdf_links.push(
                        PdfCandidate::new(
                            url,
                            Some(endpoint.to_string()),
                            ExtractionMethod::FormSubmission,
                            confidence,
                        )
                        .with_meta("strategy", "search")
                        .with_meta("jurisdiction", jurisdiction.as_str())
                        .with_meta("window_start", start.to_string()),
                    );
                    if output.pdf_links.len() >= self.config.max_results {
                        break 'jurisdictions;
                    }
                }
            }
        }

        tracing::info!(
            "Search explorer ran {} queries and found {} PDF links",
            queries,
            output.pdf_links.len()
        );
        output.metadata = serde_json::json!({
            "queries": queries,
            "pdfs": output.pdf_links.len(),
        });
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{FetchMethod, SELECTOR_CONFIDENCE};
    use crate::strategy::test_support::{context, CannedFetcher};
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_quarterly_windows_skip_future() {
        let windows = quarterly_windows(date(2020, 7, 1), 1);
        // 2019: four quarters; 2020: January, April and July
        assert_eq!(windows.len(), 7);
        assert_eq!(windows[0], (date(2019, 1, 1), date(2019, 3, 31)));
        assert_eq!(windows.last().unwrap().0, date(2020, 7, 1));
    }

    #[test]
    fn test_pdf_links_in_results_page() {
        let base = Url::parse("https://example.com/search/results").unwrap();
        let html = r#"
            <a href="https://cdn.example.com/a.pdf">A</a>
            <a href="/docs/b.PDF">B</a>
            <a href='c.pdf'>C</a>
        "#;
        let found = pdf_links_in(html, &base);
        let urls: Vec<_> = found.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/a.pdf",
                "https://example.com/docs/b.PDF",
                "https://example.com/search/c.pdf"
            ]
        );
        // The absolute link also sits in an href
        assert_eq!(found[0].1, SELECTOR_CONFIDENCE);
    }

    #[test]
    fn test_disabled_without_endpoint() {
        let explorer = SearchExplorer::new(SearchConfig {
            enabled: true,
            ..Default::default()
        });
        assert!(!explorer.enabled());
    }

    #[tokio::test]
    async fn test_posts_form_and_dedupes_across_windows() {
        let body = r#"<a href="/docs/ruling-1.pdf">1</a>"#;
        let fetcher = Arc::new(CannedFetcher::default().with_page(
            "https://example.com/search",
            200,
            body,
        ));
        let ctx = context(fetcher.clone());
        let mut explorer = SearchExplorer::new(SearchConfig {
            enabled: true,
            search_url: Some("/search".to_string()),
            jurisdictions: vec!["CIVIL".to_string()],
            history_years: 0,
            ..Default::default()
        });
        explorer.initialize(&ctx).await.unwrap();
        let output = explorer.discover(&ctx).await.unwrap();

        assert_eq!(output.pdf_links.len(), 1);
        assert_eq!(output.pdf_links[0].url, "https://example.com/docs/ruling-1.pdf");
        assert_eq!(output.pdf_links[0].method, ExtractionMethod::FormSubmission);

        let requests = fetcher.requested();
        assert!(!requests.is_empty());
        match &requests[0].1 {
            FetchMethod::Post(fields) => {
                assert!(fields.contains(&("jurisdiction".to_string(), "CIVIL".to_string())));
                assert!(fields.contains(&("page".to_string(), "1".to_string())));
                assert!(fields.iter().any(|(k, v)| k == "startDate" && v.starts_with("01/01/")));
            }
            other => panic!("expected a POST, got {:?}", other),
        }
    }
}
