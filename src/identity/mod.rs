//! Outbound identity rotation
//!
//! An identity is the pair used to present a request to the site: an
//! optional proxy plus a user-agent string. The rotator keeps a health record
//! per proxy (or `direct`), scores it from observed outcomes and picks the
//! next identity according to the configured policy and cadence.

mod record;
mod rotator;
mod supply;

pub use record::{IdentityOutcome, IdentityRecord};
pub use rotator::{IdentityRotator, DEFAULT_USER_AGENTS};
pub use supply::{IdentityCandidate, IdentitySupply, StaticSupply};

use crate::state::CrawlMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key of the identity that connects without a proxy
pub const DIRECT_KEY: &str = "direct";

/// Errors raised by the identity rotator and its supply
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No selectable identity is available")]
    Exhausted,

    #[error("Unknown identity: {0}")]
    Unknown(String),

    #[error("Identity supply error: {0}")]
    Supply(String),
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// How the next identity is chosen among selectable ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPolicy {
    /// Random, proportional to score
    #[default]
    Weighted,
    RoundRobin,
    Random,
    /// Always the highest score
    Best,
}

/// How often the identity changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationCadence {
    /// A fresh selection for every request
    PerRequest,
    /// Keep one identity until it becomes unhealthy
    PerSession,
}

impl RotationCadence {
    /// Default cadence for a crawl mode
    pub fn default_for(mode: CrawlMode) -> Self {
        match mode {
            CrawlMode::Full => Self::PerRequest,
            CrawlMode::Shallow | CrawlMode::Deep => Self::PerSession,
        }
    }
}

/// How user-agent strings are drawn from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UaRotation {
    #[default]
    Random,
    RoundRobin,
}

/// An identity handed out for one request (or one session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key: String,
    /// Proxy URL, `None` for the direct identity
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Identity {
    /// Direct identity with the given user agent
    pub fn direct(user_agent: impl Into<String>) -> Self {
        Self {
            key: DIRECT_KEY.to_string(),
            proxy: None,
            user_agent: user_agent.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cadence_by_mode() {
        assert_eq!(
            RotationCadence::default_for(CrawlMode::Full),
            RotationCadence::PerRequest
        );
        assert_eq!(
            RotationCadence::default_for(CrawlMode::Deep),
            RotationCadence::PerSession
        );
        assert_eq!(
            RotationCadence::default_for(CrawlMode::Shallow),
            RotationCadence::PerSession
        );
    }

    #[test]
    fn test_policy_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: RotationPolicy,
            cadence: RotationCadence,
        }
        let parsed: Wrapper =
            toml::from_str("policy = \"round-robin\"\ncadence = \"per-session\"").unwrap();
        assert_eq!(parsed.policy, RotationPolicy::RoundRobin);
        assert_eq!(parsed.cadence, RotationCadence::PerSession);
    }

    #[test]
    fn test_direct_identity() {
        let identity = Identity::direct("UA");
        assert_eq!(identity.key, DIRECT_KEY);
        assert!(identity.proxy.is_none());
    }
}
