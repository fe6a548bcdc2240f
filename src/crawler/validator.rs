//! PDF link validation
//!
//! A HEAD request through the same governor and identity pool as the crawl
//! decides whether a stored link is accessible, blocked or broken.

use crate::crawler::fetcher::{FetchRequest, Fetcher};
use crate::governor::RateGovernor;
use crate::identity::{IdentityOutcome, IdentityResult, IdentityRotator};
use crate::state::LinkStatus;
use crate::storage::ValidationUpdate;
use crate::url::endpoint_key;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Result of checking one link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub accessible: bool,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub final_url: Option<String>,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Maps the outcome to a link status
    ///
    /// | Outcome | Status |
    /// |---------|--------|
    /// | 200 | accessible |
    /// | 401, 403, 429 | blocked |
    /// | anything else, or an error | broken |
    pub fn link_status(&self) -> LinkStatus {
        match self.status_code {
            Some(200) => LinkStatus::Accessible,
            Some(401) | Some(403) | Some(429) => LinkStatus::Blocked,
            _ => LinkStatus::Broken,
        }
    }

    /// Converts the outcome into a storage update
    pub fn to_update(&self) -> ValidationUpdate {
        ValidationUpdate {
            status: self.link_status(),
            http_status: self.status_code,
            content_type: self.content_type.clone(),
            content_length: self.content_length,
            final_url: self.final_url.clone(),
            error: self.error.clone(),
        }
    }
}

/// Checks whether a discovered link can be retrieved
///
/// Only identity exhaustion is an error; every fetch problem is an outcome.
#[async_trait]
pub trait LinkValidator: Send + Sync {
    async fn validate(&self, url: &str) -> IdentityResult<ValidationOutcome>;
}

/// Validator issuing HEAD requests through a [`Fetcher`]
pub struct HttpValidator {
    fetcher: Arc<dyn Fetcher>,
    governor: Arc<RateGovernor>,
    rotator: Arc<IdentityRotator>,
    timeout: Duration,
    per_path_class: bool,
}

impl HttpValidator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        governor: Arc<RateGovernor>,
        rotator: Arc<IdentityRotator>,
        timeout: Duration,
        per_path_class: bool,
    ) -> Self {
        Self {
            fetcher,
            governor,
            rotator,
            timeout,
            per_path_class,
        }
    }
}

#[async_trait]
impl LinkValidator for HttpValidator {
    async fn validate(&self, url: &str) -> IdentityResult<ValidationOutcome> {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => return Ok(ValidationOutcome::failed(format!("Invalid URL: {}", e))),
        };

        let identity = self.rotator.select()?;

        let key = endpoint_key(&parsed, self.per_path_class);
        self.governor.acquire(&key).await;

        let started = Instant::now();
        let result = self
            .fetcher
            .fetch(&FetchRequest::head(parsed), &identity, self.timeout)
            .await;

        match result {
            Ok(response) => {
                if response.is_rate_limited() {
                    self.governor.on_rate_limited(&key);
                } else {
                    self.governor.on_success(&key);
                    let outcome = IdentityOutcome::Success {
                        latency: started.elapsed(),
                    };
                    if let Err(e) = self.rotator.report(&identity, outcome) {
                        tracing::debug!("Failed to report identity outcome: {}", e);
                    }
                }

                Ok(ValidationOutcome {
                    accessible: response.status == 200,
                    status_code: Some(response.status),
                    content_type: response.content_type().map(str::to_string),
                    content_length: response.content_length(),
                    final_url: Some(response.final_url.clone()),
                    error: None,
                })
            }
            Err(e) => {
                if e.is_transient() {
                    self.governor.on_error(&key);
                }
                if let Err(report_err) = self.rotator.report(
                    &identity,
                    IdentityOutcome::Failure {
                        error: e.to_string(),
                    },
                ) {
                    tracing::debug!("Failed to report identity outcome: {}", report_err);
                }
                Ok(ValidationOutcome::failed(e.to_string()))
            }
        }
    }
}
