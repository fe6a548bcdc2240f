//! Serializable frontier state
//!
//! Stored as JSON in the session row so an interrupted crawl can continue
//! exactly where it stopped.

use crate::frontier::FrontierEntry;
use serde::{Deserialize, Serialize};

/// Frontier counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub accepted: u64,
    pub rejected_seen: u64,
    pub rejected_depth: u64,
    pub rejected_malformed: u64,
    pub pdf_new: u64,
    pub pdf_duplicates: u64,
}

/// Everything needed to rebuild a frontier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    /// Entries popped but not finished, in pop order
    pub in_flight: Vec<FrontierEntry>,
    /// Entries still waiting, in queue order
    pub pending: Vec<FrontierEntry>,
    /// Dedup keys already accepted, sorted
    pub seen: Vec<String>,
    #[serde(default)]
    pub stats: FrontierStats,
}

impl FrontierSnapshot {
    /// Number of entries that will be fetched after a restore
    pub fn queued(&self) -> usize {
        self.in_flight.len() + self.pending.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let snapshot = FrontierSnapshot {
            in_flight: vec![FrontierEntry::new("https://example.com/a", 1, None)],
            pending: vec![FrontierEntry::new(
                "https://example.com/b",
                2,
                Some("https://example.com/a".to_string()),
            )],
            seen: vec!["https://example.com/a".to_string()],
            stats: FrontierStats {
                accepted: 2,
                ..Default::default()
            },
        };
        let json = snapshot.to_json().unwrap();
        assert_eq!(FrontierSnapshot::from_json(&json).unwrap(), snapshot);
        assert_eq!(snapshot.queued(), 2);
    }

    #[test]
    fn test_missing_stats_default() {
        let snapshot = FrontierSnapshot::from_json(r#"{"in_flight":[],"pending":[],"seen":[]}"#).unwrap();
        assert_eq!(snapshot.stats, FrontierStats::default());
    }
}
