//! Identity supply
//!
//! Where proxies come from. Acquiring proxy lists from third-party feeds is
//! outside this crate; `StaticSupply` covers configured lists and a local file.

use crate::config::IdentityConfig;
use crate::identity::{IdentityError, IdentityResult};
use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

/// A proxy offered by a supply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCandidate {
    pub key: String,
    pub source: String,
    pub protocol: String,
}

impl IdentityCandidate {
    /// Builds a candidate from a proxy URL, returning `None` when it does not parse
    pub fn from_proxy_url(proxy: &str, source: &str) -> Option<Self> {
        let parsed = Url::parse(proxy.trim()).ok()?;
        parsed.host_str()?;
        Some(Self {
            key: proxy.trim().to_string(),
            source: source.to_string(),
            protocol: parsed.scheme().to_string(),
        })
    }
}

/// Source of outbound proxies
#[async_trait]
pub trait IdentitySupply: Send + Sync {
    /// Lists every proxy currently offered
    async fn list_available(&self) -> IdentityResult<Vec<IdentityCandidate>>;
}

/// Supply backed by the configured proxy list and an optional proxy file
///
/// The file holds one proxy URL per line; blank lines and lines starting
/// with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct StaticSupply {
    proxies: Vec<String>,
    proxy_file: Option<PathBuf>,
}

impl StaticSupply {
    pub fn new(proxies: Vec<String>, proxy_file: Option<PathBuf>) -> Self {
        Self {
            proxies,
            proxy_file,
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(
            config.proxies.clone(),
            config.proxy_file.as_ref().map(PathBuf::from),
        )
    }
}

#[async_trait]
impl IdentitySupply for StaticSupply {
    async fn list_available(&self) -> IdentityResult<Vec<IdentityCandidate>> {
        let mut candidates = Vec::new();

        for proxy in &self.proxies {
            match IdentityCandidate::from_proxy_url(proxy, "config") {
                Some(candidate) => candidates.push(candidate),
                None => tracing::warn!("Ignoring malformed proxy in config: {}", proxy),
            }
        }

        if let Some(path) = &self.proxy_file {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                IdentityError::Supply(format!("Failed to read {}: {}", path.display(), e))
            })?;
            for line in content.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match IdentityCandidate::from_proxy_url(line, "file") {
                    Some(candidate) => candidates.push(candidate),
                    None => tracing::warn!("Ignoring malformed proxy in {}: {}", path.display(), line),
                }
            }
        }

        candidates.dedup_by(|a, b| a.key == b.key);
        Ok(candidates)
    }
}
