//! Identity health records and scoring

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Score given to an identity that has not been used yet
pub const INITIAL_SCORE: f64 = 50.0;

/// Requests an identity must have made before score thresholds apply
///
/// Until then only consecutive failures decide health and selection.
pub const MIN_SCORED_REQUESTS: u64 = 10;

/// Weight of the previous average in the response-time moving average
const EMA_OLD_WEIGHT: f64 = 0.8;

/// Outcome of a request made through an identity
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityOutcome {
    Success { latency: Duration },
    Failure { error: String },
}

/// Health of one outbound identity
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub key: String,
    pub source: String,
    pub protocol: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    /// Moving average of successful response times, in seconds
    pub avg_response_time: Option<f64>,
    pub score: f64,
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl IdentityRecord {
    /// Creates a fresh, healthy record
    pub fn new(key: impl Into<String>, source: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
            protocol: protocol.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            avg_response_time: None,
            score: INITIAL_SCORE,
            is_healthy: true,
            last_check: None,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }

    /// Fraction of requests that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    /// Applies an outcome, then rescores and re-evaluates health
    pub fn apply(
        &mut self,
        outcome: &IdentityOutcome,
        max_consecutive_failures: u32,
        prune_score: f64,
        now: DateTime<Utc>,
    ) {
        self.total_requests += 1;
        self.last_check = Some(now);

        match outcome {
            IdentityOutcome::Success { latency } => {
                self.successful_requests += 1;
                self.consecutive_failures = 0;
                self.last_success = Some(now);
                let secs = latency.as_secs_f64();
                self.avg_response_time = Some(match self.avg_response_time {
                    Some(avg) => EMA_OLD_WEIGHT * avg + (1.0 - EMA_OLD_WEIGHT) * secs,
                    None => secs,
                });
            }
            IdentityOutcome::Failure { error } => {
                self.failed_requests += 1;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure = Some(now);
                self.last_error = Some(error.clone());
            }
        }

        self.score = self.compute_score(now);
        self.is_healthy = self.consecutive_failures < max_consecutive_failures
            && (!self.is_scored() || self.score >= prune_score);
    }

    /// True once enough requests were made for the score to be trusted
    pub fn is_scored(&self) -> bool {
        self.total_requests >= MIN_SCORED_REQUESTS
    }

    /// Computes the score in [0, 100] from counters and recency
    pub fn compute_score(&self, now: DateTime<Utc>) -> f64 {
        if self.total_requests == 0 {
            return INITIAL_SCORE;
        }

        let mut score = self.success_rate() * 50.0;

        score += match self.avg_response_time {
            None => 25.0,
            Some(t) if t <= 2.0 => 25.0,
            Some(t) if t <= 5.0 => 15.0,
            Some(_) => 5.0,
        };

        let one_hour = ChronoDuration::hours(1);
        let six_hours = ChronoDuration::hours(6);

        if let Some(success) = self.last_success {
            let age = now - success;
            if age < one_hour {
                score += 15.0;
            } else if age < six_hours {
                score += 10.0;
            }
        }

        if let Some(failure) = self.last_failure {
            let age = now - failure;
            if age < one_hour {
                score -= 20.0;
            } else if age < six_hours {
                score -= 10.0;
            }
        }

        score.clamp(0.0, 100.0)
    }

    /// True when the record may be handed out
    pub fn is_selectable(&self, min_score: f64) -> bool {
        self.is_healthy && (!self.is_scored() || self.score >= min_score)
    }

    /// Time left before a record that is not selectable may be tried again
    ///
    /// Zero when the cooldown since the last failure has passed.
    pub fn probation_wait(&self, cooldown: Duration, now: DateTime<Utc>) -> Duration {
        let Some(failure) = self.last_failure else {
            return Duration::ZERO;
        };
        let elapsed = (now - failure).to_std().unwrap_or(Duration::ZERO);
        cooldown.saturating_sub(elapsed)
    }
}
