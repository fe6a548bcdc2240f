//! Adaptive rate governor
//!
//! One token bucket per logical endpoint. The refill rate starts at the
//! configured requests-per-minute and adapts to what the site tells us:
//! rate-limit responses halve it and impose an exponential backoff, transient
//! errors shave it, and successes let it recover towards the base rate. The
//! rate never drops below the configured floor, so throughput degrades but
//! the crawl never stalls.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Tunables for the governor, in requests per minute
#[derive(Debug, Clone)]
pub struct GovernorSettings {
    pub base_rate: f64,
    pub burst: u32,
    pub min_rate: f64,
    pub recovery_step: f64,
    pub error_factor: f64,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&RateLimitConfig> for GovernorSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            base_rate: config.requests_per_minute,
            burst: config.burst.max(1),
            min_rate: config.min_rate,
            recovery_step: config.recovery_step,
            error_factor: config.error_factor,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Observable state of one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointStats {
    pub effective_rate: f64,
    pub consecutive_rate_limits: u32,
    /// Time left before the endpoint may be used again
    pub backoff_remaining: Duration,
    pub tokens: f64,
}

#[derive(Debug)]
struct EndpointState {
    tokens: f64,
    effective_rate: f64,
    last_refill: Instant,
    consecutive_rate_limits: u32,
    backoff_until: Option<Instant>,
}

impl EndpointState {
    fn new(settings: &GovernorSettings, now: Instant) -> Self {
        Self {
            tokens: settings.burst as f64,
            effective_rate: settings.base_rate,
            last_refill: now,
            consecutive_rate_limits: 0,
            backoff_until: None,
        }
    }

    fn refill(&mut self, burst: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.effective_rate / 60.0).min(burst as f64);
        self.last_refill = now;
    }

    /// Takes a token, or returns how long to wait before trying again
    fn try_take(&mut self, burst: u32, now: Instant) -> Option<Duration> {
        if let Some(until) = self.backoff_until {
            if until > now {
                return Some(until - now);
            }
            self.backoff_until = None;
        }

        self.refill(burst, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return None;
        }

        let per_second = self.effective_rate / 60.0;
        Some(Duration::from_secs_f64((1.0 - self.tokens) / per_second))
    }
}

/// Per-endpoint adaptive token buckets
///
/// The endpoint map sits behind one `std::sync::Mutex` that is never held
/// across an await point.
#[derive(Debug)]
pub struct RateGovernor {
    settings: GovernorSettings,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl RateGovernor {
    pub fn new(settings: GovernorSettings) -> Self {
        Self {
            settings,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(GovernorSettings::from(config))
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, EndpointState>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_state<T>(&self, key: &str, f: impl FnOnce(&mut EndpointState, Instant) -> T) -> T {
        let now = Instant::now();
        let mut endpoints = self.endpoints();
        let state = endpoints
            .entry(key.to_string())
            .or_insert_with(|| EndpointState::new(&self.settings, now));
        f(state, now)
    }

    /// Waits until a request to `key` is allowed
    ///
    /// Honors any active backoff, then takes one token from the bucket.
    pub async fn acquire(&self, key: &str) {
        let burst = self.settings.burst;
        loop {
            match self.with_state(key, |state, now| state.try_take(burst, now)) {
                None => return,
                Some(wait) => {
                    tracing::debug!("Throttling {} for {:?}", key, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Records a successful request
    pub fn on_success(&self, key: &str) {
        let base = self.settings.base_rate;
        let step = self.settings.recovery_step;
        self.with_state(key, |state, _| {
            state.consecutive_rate_limits = 0;
            state.effective_rate = (state.effective_rate * (1.0 + step)).min(base);
        });
    }

    /// Records a rate-limit signal and returns the imposed backoff
    ///
    /// The nth consecutive signal waits `base_backoff * 2^(n-1)`, capped at
    /// `max_backoff`, and halves the effective rate down to the floor.
    pub fn on_rate_limited(&self, key: &str) -> Duration {
        let settings = &self.settings;
        let backoff = self.with_state(key, |state, now| {
            state.consecutive_rate_limits = state.consecutive_rate_limits.saturating_add(1);
            state.effective_rate = (state.effective_rate / 2.0).max(settings.min_rate);

            let exponent = state.consecutive_rate_limits.saturating_sub(1).min(31);
            let backoff = settings
                .base_backoff
                .checked_mul(1u32 << exponent)
                .unwrap_or(settings.max_backoff)
                .min(settings.max_backoff);

            state.backoff_until = Some(now + backoff);
            state.tokens = 0.0;
            backoff
        });

        tracing::warn!(
            "Rate limited on {}; backing off for {:?}",
            key,
            backoff
        );
        backoff
    }

    /// Records a transient failure
    pub fn on_error(&self, key: &str) {
        let factor = self.settings.error_factor;
        let floor = self.settings.min_rate;
        self.with_state(key, |state, _| {
            state.effective_rate = (state.effective_rate * factor).max(floor);
        });
    }

    /// Current state of an endpoint, if it has been seen
    pub fn snapshot(&self, key: &str) -> Option<EndpointStats> {
        let now = Instant::now();
        self.endpoints().get(key).map(|state| EndpointStats {
            effective_rate: state.effective_rate,
            consecutive_rate_limits: state.consecutive_rate_limits,
            backoff_remaining: state
                .backoff_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default(),
            tokens: state.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GovernorSettings {
        GovernorSettings {
            base_rate: 60.0,
            burst: 2,
            min_rate: 1.0,
            recovery_step: 0.1,
            error_factor: 0.9,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_backoff_doubles_and_rate_halves() {
        let governor = RateGovernor::new(settings());

        let d1 = governor.on_rate_limited("site");
        let stats = governor.snapshot("site").unwrap();
        assert!(stats.effective_rate <= 30.0);

        let d2 = governor.on_rate_limited("site");
        let d3 = governor.on_rate_limited("site");

        assert_eq!(d1, Duration::from_secs(5));
        assert_eq!(d2, d1 * 2);
        assert_eq!(d3, d1 * 4);
        assert_eq!(
            governor.snapshot("site").unwrap().consecutive_rate_limits,
            3
        );
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let governor = RateGovernor::new(settings());
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let backoff = governor.on_rate_limited("site");
            assert!(backoff >= previous);
            assert!(backoff <= Duration::from_secs(300));
            previous = backoff;
        }
        assert_eq!(previous, Duration::from_secs(300));
    }

    #[test]
    fn test_rate_never_drops_below_floor() {
        let governor = RateGovernor::new(settings());
        for i in 0..1000 {
            if i % 3 == 0 {
                governor.on_error("site");
            } else {
                governor.on_rate_limited("site");
            }
            assert!(governor.snapshot("site").unwrap().effective_rate >= 1.0);
        }
    }

    #[test]
    fn test_success_recovers_towards_base() {
        let governor = RateGovernor::new(settings());
        governor.on_rate_limited("site");
        assert_eq!(governor.snapshot("site").unwrap().effective_rate, 30.0);

        governor.on_success("site");
        let stats = governor.snapshot("site").unwrap();
        assert!((stats.effective_rate - 33.0).abs() < 1e-9);
        assert_eq!(stats.consecutive_rate_limits, 0);

        for _ in 0..100 {
            governor.on_success("site");
        }
        assert_eq!(governor.snapshot("site").unwrap().effective_rate, 60.0);
    }

    #[test]
    fn test_error_shaves_rate() {
        let governor = RateGovernor::new(settings());
        governor.on_error("site");
        assert!((governor.snapshot("site").unwrap().effective_rate - 54.0).abs() < 1e-9);
    }

    #[test]
    fn test_endpoints_are_independent() {
        let governor = RateGovernor::new(settings());
        governor.on_rate_limited("a");
        assert!(governor.snapshot("b").is_none());
        governor.on_success("b");
        assert_eq!(governor.snapshot("b").unwrap().effective_rate, 60.0);
    }

    #[tokio::test]
    async fn test_burst_is_available_immediately() {
        let governor = RateGovernor::new(settings());
        let start = Instant::now();
        governor.acquire("site").await;
        governor.acquire("site").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let governor = RateGovernor::new(settings());
        governor.acquire("site").await;
        governor.acquire("site").await;

        let start = Instant::now();
        governor.acquire("site").await;
        // One request per second at 60 rpm
        assert!(start.elapsed() >= Duration::from_millis(990));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_out_backoff() {
        let governor = RateGovernor::new(settings());
        let backoff = governor.on_rate_limited("site");

        let start = Instant::now();
        governor.acquire("site").await;
        assert!(start.elapsed() >= backoff);
    }
}
