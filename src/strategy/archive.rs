//! Legacy archive prober
//!
//! Older document collections tend to live under year-keyed paths that
//! nothing links to any more. Each template is expanded for every year and
//! checked with a HEAD request.

use crate::config::ArchiveConfig;
use crate::strategy::{DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult, UrlFilter};
use async_trait::async_trait;
use chrono::{Datelike, Utc};

/// Probes year-keyed archive paths
pub struct ArchiveProber {
    config: ArchiveConfig,
    filter: UrlFilter,
}

impl ArchiveProber {
    pub fn new(config: ArchiveConfig) -> Self {
        Self {
            config,
            filter: UrlFilter::default(),
        }
    }

    /// Template paths for every configured year, capped at `max-probes`
    fn probe_paths(&self, current_year: i32) -> Vec<String> {
        let end_year = self.config.end_year.unwrap_or(current_year);
        self.config
            .templates
            .iter()
            .flat_map(|template| {
                (self.config.start_year..=end_year)
                    .map(move |year| template.replace("{year}", &year.to_string()))
            })
            .take(self.config.max_probes)
            .collect()
    }
}

#[async_trait]
impl DiscoveryStrategy for ArchiveProber {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let paths = self.probe_paths(Utc::now().year());
        let mut output = StrategyOutput::default();
        let mut probed = 0usize;

        for path in &paths {
            let url = match ctx.resolve(path) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Skipping archive path {}: {}", path, e);
                    continue;
                }
            };
            if !self.filter.allows(url.as_str()) {
                continue;
            }

            probed += 1;
            match ctx.head(&url).await {
                Ok(response) if response.is_success() || matches!(response.status, 301 | 302) => {
                    tracing::debug!("Archive section found: {} (HTTP {})", url, response.status);
                    output.seed_urls.push(url.to_string());
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::debug!("Archive probe {} failed: {}", url, e),
            }
        }

        tracing::info!(
            "Archive prober found {} sections in {} probes",
            output.seed_urls.len(),
            probed
        );
        output.metadata = serde_json::json!({
            "probes": probed,
            "found": output.seed_urls.len(),
        });
        Ok(output)
    }
}
