//! Page worker
//!
//! A worker takes one frontier entry through fetch, block detection and
//! extraction. It never touches the frontier or the store; the orchestrator
//! applies the returned outcome.

use crate::crawler::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::crawler::parser::{Extraction, LinkExtractor};
use crate::detector::{BlockDetector, BlockEvidence, Inspection};
use crate::frontier::FrontierEntry;
use crate::governor::RateGovernor;
use crate::identity::{Identity, IdentityError, IdentityOutcome, IdentityRotator};
use crate::url::endpoint_key;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// What happened to one page
#[derive(Debug)]
pub(crate) enum WorkOutcome {
    /// Fetched and mined
    Page {
        status: u16,
        final_url: String,
        extraction: Extraction,
    },
    /// A blocking page came back
    Blocked {
        evidence: BlockEvidence,
        body: String,
    },
    /// Every attempt was answered with 429
    RateLimited,
    /// Permanent failure or transient failures past the retry budget
    Failed { error: String },
    /// No identity could be selected
    Exhausted(IdentityError),
}

/// Fetch pipeline shared by every in-flight task
#[derive(Clone)]
pub(crate) struct Worker {
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn LinkExtractor>,
    pub detector: Arc<BlockDetector>,
    pub governor: Arc<RateGovernor>,
    pub rotator: Arc<IdentityRotator>,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub per_path_class: bool,
}

fn is_markup(response: &FetchResponse) -> bool {
    match response.content_type() {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("html") || ct.contains("xml") || ct.starts_with("text/")
        }
        None => true,
    }
}

impl Worker {
    fn report(&self, identity: &Identity, outcome: IdentityOutcome) {
        if let Err(e) = self.rotator.report(identity, outcome) {
            tracing::debug!("Could not report identity outcome: {}", e);
        }
    }

    /// Delay before retry number `attempt + 1`
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Processes one entry
    ///
    /// Transient fetch errors are retried up to `retry_attempts` times with
    /// exponential backoff. A 429 feeds the governor, whose next `acquire`
    /// waits out the backoff, and uses up one attempt.
    pub async fn process(&self, entry: &FrontierEntry) -> WorkOutcome {
        let url = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                return WorkOutcome::Failed {
                    error: format!("Invalid URL: {}", e),
                }
            }
        };
        let key = endpoint_key(&url, self.per_path_class);
        let request = FetchRequest::get(url.clone());

        for attempt in 0..=self.retry_attempts {
            self.governor.acquire(&key).await;
            let identity = match self.rotator.select() {
                Ok(identity) => identity,
                Err(e) => return WorkOutcome::Exhausted(e),
            };

            let started = Instant::now();
            let response = match self.fetcher.fetch(&request, &identity, self.timeout).await {
                Ok(response) => response,
                Err(e) => {
                    self.governor.on_error(&key);
                    self.report(
                        &identity,
                        IdentityOutcome::Failure {
                            error: e.to_string(),
                        },
                    );
                    if e.is_transient() && attempt < self.retry_attempts {
                        let delay = self.backoff_for(attempt);
                        tracing::debug!(
                            "Transient error on {} (attempt {}): {}; retrying in {:?}",
                            entry.url,
                            attempt + 1,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return WorkOutcome::Failed {
                        error: e.to_string(),
                    };
                }
            };

            // A 429 never counts against the identity
            if response.is_rate_limited() {
                let backoff = self.governor.on_rate_limited(&key);
                tracing::debug!("Rate limited on {}; backing off {:?}", entry.url, backoff);
                continue;
            }

            if let Inspection::Blocked(evidence) = self.detector.inspect(&response) {
                self.governor.on_error(&key);
                self.report(
                    &identity,
                    IdentityOutcome::Failure {
                        error: format!("blocked ({})", evidence.signal),
                    },
                );
                return WorkOutcome::Blocked {
                    evidence,
                    body: response.body,
                };
            }

            self.governor.on_success(&key);
            self.report(
                &identity,
                IdentityOutcome::Success {
                    latency: started.elapsed(),
                },
            );

            if !response.is_success() {
                return WorkOutcome::Failed {
                    error: format!("HTTP {}", response.status),
                };
            }

            let extraction = if is_markup(&response) {
                let base = Url::parse(&response.final_url).unwrap_or(url);
                self.extractor.extract(&response.body, &base)
            } else {
                tracing::debug!(
                    "Skipping extraction for {} ({})",
                    entry.url,
                    response.content_type().unwrap_or_default()
                );
                Extraction::default()
            };

            return WorkOutcome::Page {
                status: response.status,
                final_url: response.final_url,
                extraction,
            };
        }

        WorkOutcome::RateLimited
    }
}
