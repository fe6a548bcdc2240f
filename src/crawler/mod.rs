//! Crawler module for page fetching and processing
//!
//! This module contains the core discovery logic, including:
//! - HTTP fetching with manual redirects and identity-aware clients
//! - HTML parsing and multi-method PDF link extraction
//! - The per-page worker (fetch, block detection, extraction)
//! - Link validation
//! - Overall run orchestration

mod coordinator;
mod fetcher;
mod parser;
mod structured;
mod validator;
mod worker;

pub use coordinator::{
    Orchestrator, OrchestratorParts, RunOptions, RunSummary, SessionTarget, ValidationReport,
};
pub use fetcher::{
    build_http_client, FetchError, FetchMethod, FetchRequest, FetchResponse, Fetcher,
    HttpFetcher, MAX_REDIRECTS,
};
pub use parser::{
    Extraction, HtmlLinkExtractor, LinkExtractor, PdfCandidate, REGEX_CONFIDENCE,
    SCRIPT_CONFIDENCE, SELECTOR_CONFIDENCE, STRUCTURED_CONFIDENCE,
};
pub(crate) use parser::pdf_url_regex;
pub use structured::extract_structured_pdfs;
pub use validator::{HttpValidator, LinkValidator, ValidationOutcome};

use crate::config::Config;
use crate::storage::{open_storage, shared};
use std::path::Path;

/// Runs a discovery session with the production services
///
/// This is the main entry point for a run. It will:
/// 1. Open the store at `output.database-path`
/// 2. Build the fetcher, governor, rotator and strategies from `config`
/// 3. Start or resume the session named in `options`
/// 4. Crawl until the frontier drains, a limit or signal stops it, or a
///    fatal error fails it
///
/// # Arguments
///
/// * `config` - The discovery configuration
/// * `options` - Session target and per-run overrides
///
/// # Example
///
/// ```no_run
/// use cendoj_discovery::config::load_config;
/// use cendoj_discovery::crawler::{discover, RunOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("config.toml"))?;
/// let summary = discover(config, RunOptions::default()).await?;
/// println!("{} pages visited", summary.counters.pages_visited);
/// # Ok(())
/// # }
/// ```
pub async fn discover(config: Config, options: RunOptions) -> crate::Result<RunSummary> {
    let storage = shared(open_storage(Path::new(&config.output.database_path))?);
    let mut orchestrator = Orchestrator::new(OrchestratorParts::from_config(config, storage));
    orchestrator.run(options).await
}
