use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a discovery session explores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlMode {
    /// Seeds plus one hop, no pre-crawl strategies
    Shallow,
    /// Bounded BFS up to the configured depth
    #[default]
    Deep,
    /// Unbounded BFS
    Full,
}

impl CrawlMode {
    /// Depth limit for this mode given the configured maximum
    pub fn depth_limit(&self, configured_max: u32) -> Option<u32> {
        match self {
            Self::Shallow => Some(1),
            Self::Deep => Some(configured_max),
            Self::Full => None,
        }
    }

    /// Whether pre-crawl strategies run in this mode
    pub fn runs_strategies(&self) -> bool {
        !matches!(self, Self::Shallow)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Deep => "deep",
            Self::Full => "full",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "shallow" => Some(Self::Shallow),
            "deep" => Some(Self::Deep),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
