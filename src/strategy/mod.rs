//! Pre-crawl discovery strategies
//!
//! Each strategy is an independent producer of seed pages and PDF
//! candidates. Strategies only read: they fetch through the shared governor
//! and identity pool and can list the URLs already in the catalog, but the
//! orchestrator is the one that pushes their output through the frontier.
//!
//! Strategies are registered in [`build_strategies`]; adding one is a new
//! line there.

mod archive;
mod form;
mod pattern;
mod search;
mod sitemap;
mod taxonomy;

pub use archive::ArchiveProber;
pub use form::{FormField, FormProber, FormSpec};
pub use pattern::{generate_gap_urls, PatternGenerator, PATTERN_CONFIDENCE};
pub use search::{quarterly_windows, SearchExplorer};
pub use sitemap::{parse_sitemap, SitemapDocument, SitemapWalker, SITEMAP_CONFIDENCE};
pub use taxonomy::TaxonomyWalker;

use crate::config::StrategiesConfig;
use crate::crawler::{
    pdf_url_regex, FetchError, FetchRequest, FetchResponse, Fetcher, PdfCandidate,
    REGEX_CONFIDENCE, SELECTOR_CONFIDENCE,
};
use crate::governor::RateGovernor;
use crate::identity::{IdentityError, IdentityOutcome, IdentityRotator};
use crate::storage::{self, SharedStorage, Storage, StorageError};
use crate::url::endpoint_key;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Errors raised by discovery strategies
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid filter pattern: {0}")]
    Filter(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
}

impl StrategyError {
    /// True for errors that make the rest of a strategy's requests pointless
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Identity(_) | Self::Storage(_))
    }
}

/// Result type for strategy operations
pub type StrategyResult<T> = Result<T, StrategyError>;

/// What a strategy discovered
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    /// Pages to crawl, offered to the frontier at depth 0
    pub seed_urls: Vec<String>,
    /// PDF links, stored directly in the catalog
    pub pdf_links: Vec<PdfCandidate>,
    /// Free-form counters for the run log
    pub metadata: serde_json::Value,
}

/// A producer of seeds and PDF candidates that runs before the BFS
#[async_trait]
pub trait DiscoveryStrategy: Send {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    /// Prepares the strategy; failing here skips it
    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput>;

    async fn cleanup(&mut self) -> StrategyResult<()> {
        Ok(())
    }
}

/// Builds every configured strategy in registry order
pub fn build_strategies(config: &StrategiesConfig) -> Vec<Box<dyn DiscoveryStrategy>> {
    vec![
        Box::new(SitemapWalker::new(config.sitemap.clone())),
        Box::new(TaxonomyWalker::new(config.taxonomy.clone())),
        Box::new(ArchiveProber::new(config.archive.clone())),
        Box::new(SearchExplorer::new(config.search.clone())),
        Box::new(FormProber::new(config.forms.clone())),
        Box::new(PatternGenerator::new(config.pattern.clone())),
    ]
}

/// Include/exclude regex filter applied to strategy output
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlFilter {
    /// Compiles the filter
    ///
    /// An empty include list admits everything not excluded.
    pub fn new(include: &[String], exclude: &[String]) -> StrategyResult<Self> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(|e| StrategyError::Filter(format!("{}: {}", p, e))))
                .collect::<StrategyResult<Vec<_>>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn allows(&self, url: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(url))
    }
}

/// Shared services a strategy may use
///
/// Every request goes through the rate governor and the identity rotator,
/// exactly like crawl fetches.
pub struct StrategyContext {
    fetcher: Arc<dyn Fetcher>,
    governor: Arc<RateGovernor>,
    rotator: Arc<IdentityRotator>,
    storage: SharedStorage,
    base_url: Url,
    timeout: Duration,
    per_path_class: bool,
}

impl StrategyContext {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        governor: Arc<RateGovernor>,
        rotator: Arc<IdentityRotator>,
        storage: SharedStorage,
        base_url: Url,
        timeout: Duration,
        per_path_class: bool,
    ) -> Self {
        Self {
            fetcher,
            governor,
            rotator,
            storage,
            base_url,
            timeout,
            per_path_class,
        }
    }

    /// Root URL of the target site
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a possibly relative reference against the site root
    pub fn resolve(&self, reference: &str) -> StrategyResult<Url> {
        self.base_url
            .join(reference)
            .map_err(|e| StrategyError::InvalidUrl(format!("{}: {}", reference, e)))
    }

    /// Raw URLs of every link already in the catalog
    pub fn known_link_urls(&self) -> StrategyResult<Vec<String>> {
        Ok(storage::lock(&self.storage)?.all_link_urls()?)
    }

    pub async fn get(&self, url: &Url) -> StrategyResult<FetchResponse> {
        self.send(FetchRequest::get(url.clone())).await
    }

    pub async fn head(&self, url: &Url) -> StrategyResult<FetchResponse> {
        self.send(FetchRequest::head(url.clone())).await
    }

    pub async fn post_form(
        &self,
        url: &Url,
        fields: Vec<(String, String)>,
    ) -> StrategyResult<FetchResponse> {
        self.send(FetchRequest::post_form(url.clone(), fields)).await
    }

    /// Fetches once, feeding the outcome back to the governor and rotator
    ///
    /// Non-2xx responses are returned as responses; strategies decide what
    /// a status means to them.
    async fn send(&self, request: FetchRequest) -> StrategyResult<FetchResponse> {
        let key = endpoint_key(&request.url, self.per_path_class);
        self.governor.acquire(&key).await;
        let identity = self.rotator.select()?;

        let started = Instant::now();
        let result = self.fetcher.fetch(&request, &identity, self.timeout).await;

        let outcome = match &result {
            // A 429 never counts against the identity
            Ok(response) if response.is_rate_limited() => {
                let backoff = self.governor.on_rate_limited(&key);
                tracing::debug!("Rate limited on {}; backing off {:?}", key, backoff);
                None
            }
            Ok(_) => {
                self.governor.on_success(&key);
                Some(IdentityOutcome::Success {
                    latency: started.elapsed(),
                })
            }
            Err(e) => {
                self.governor.on_error(&key);
                Some(IdentityOutcome::Failure {
                    error: e.to_string(),
                })
            }
        };

        if let Some(outcome) = outcome {
            if let Err(e) = self.rotator.report(&identity, outcome) {
                tracing::debug!("Could not report identity outcome: {}", e);
            }
        }

        Ok(result?)
    }
}

fn href_pdf_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"']+?\.pdf)["']"#).expect("href PDF pattern is valid")
    })
}

/// PDF links in a result page with their confidence, deduplicated
///
/// Absolute URLs anywhere in the markup come first; `href` values are
/// resolved against `base` and rank higher.
pub(crate) fn pdf_links_in(html: &str, base: &Url) -> Vec<(String, f64)> {
    let mut seen = HashSet::new();
    let mut found: Vec<(String, f64)> = Vec::new();

    for m in pdf_url_regex().find_iter(html) {
        if seen.insert(m.as_str().to_string()) {
            found.push((m.as_str().to_string(), REGEX_CONFIDENCE));
        }
    }

    for capture in href_pdf_regex().captures_iter(html) {
        let Some(reference) = capture.get(1) else {
            continue;
        };
        let Ok(url) = base.join(reference.as_str()) else {
            continue;
        };
        let url = url.to_string();
        if seen.insert(url.clone()) {
            found.push((url, SELECTOR_CONFIDENCE));
        } else if let Some(entry) = found.iter_mut().find(|(u, _)| *u == url) {
            entry.1 = entry.1.max(SELECTOR_CONFIDENCE);
        }
    }

    found
}

/// Fetches a page and returns its body if the status is 2xx
pub(crate) async fn fetch_html(ctx: &StrategyContext, url: &Url) -> StrategyResult<String> {
    let response = ctx.get(url).await?;
    if !response.is_success() {
        return Err(StrategyError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }
    Ok(response.body)
}
