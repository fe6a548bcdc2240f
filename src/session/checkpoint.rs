//! Resume snapshots and checkpoint cadence

use crate::frontier::FrontierSnapshot;
use crate::storage::SessionCounters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Everything a resumed session needs, stored as JSON in the session row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub frontier: FrontierSnapshot,
    pub counters: SessionCounters,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new(frontier: FrontierSnapshot, counters: SessionCounters) -> Self {
        Self {
            frontier,
            counters,
            saved_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Decides when the next periodic checkpoint is due
///
/// A checkpoint is due after `every_pages` processed entries or `every`
/// elapsed time, whichever comes first. A zero threshold disables that
/// trigger.
#[derive(Debug, Clone)]
pub struct CheckpointTimer {
    every_pages: u64,
    every: Duration,
    pages: u64,
    last: Instant,
}

impl CheckpointTimer {
    pub fn new(every_pages: u64, every: Duration) -> Self {
        Self {
            every_pages,
            every,
            pages: 0,
            last: Instant::now(),
        }
    }

    /// Counts one processed entry, fetched or not
    pub fn record_page(&mut self) {
        self.pages += 1;
    }

    pub fn pages_since_checkpoint(&self) -> u64 {
        self.pages
    }

    pub fn is_due(&self) -> bool {
        if self.pages == 0 {
            return false;
        }
        let by_pages = self.every_pages > 0 && self.pages >= self.every_pages;
        let by_time = !self.every.is_zero() && self.last.elapsed() >= self.every;
        by_pages || by_time
    }

    /// Restarts both triggers
    pub fn reset(&mut self) {
        self.pages = 0;
        self.last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontier::FrontierEntry;

    #[test]
    fn test_state_json_roundtrip() {
        let state = CheckpointState::new(
            FrontierSnapshot {
                pending: vec![FrontierEntry::new("https://example.com/a", 1, None)],
                ..Default::default()
            },
            SessionCounters {
                pages_visited: 12,
                ..Default::default()
            },
        );
        let back = CheckpointState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_due_by_pages() {
        let mut timer = CheckpointTimer::new(3, Duration::from_secs(3600));
        assert!(!timer.is_due());
        timer.record_page();
        timer.record_page();
        assert!(!timer.is_due());
        timer.record_page();
        assert!(timer.is_due());
        timer.reset();
        assert!(!timer.is_due());
        assert_eq!(timer.pages_since_checkpoint(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_by_time() {
        let mut timer = CheckpointTimer::new(100, Duration::from_secs(300));
        timer.record_page();
        assert!(!timer.is_due());
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(timer.is_due());
    }

    #[test]
    fn test_idle_timer_is_never_due() {
        let timer = CheckpointTimer::new(1, Duration::ZERO);
        assert!(!timer.is_due());
    }
}
