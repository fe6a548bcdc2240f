//! Identity rotator
//!
//! Holds one health record per identity and hands out identities according
//! to the rotation policy and cadence. Each record sits behind its own mutex
//! so concurrent reports for different identities do not contend.

use crate::config::IdentityConfig;
use crate::identity::{
    Identity, IdentityCandidate, IdentityError, IdentityOutcome, IdentityRecord, IdentityResult,
    IdentitySupply, RotationCadence, RotationPolicy, UaRotation, DIRECT_KEY,
};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// User agents used when none are configured
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

#[derive(Default)]
struct Pool {
    /// Insertion order, for round-robin
    order: Vec<String>,
    records: HashMap<String, Arc<Mutex<IdentityRecord>>>,
}

/// Selects identities and tracks their health
pub struct IdentityRotator {
    policy: RotationPolicy,
    cadence: RotationCadence,
    ua_rotation: UaRotation,
    user_agents: Vec<String>,
    min_score: f64,
    prune_score: f64,
    max_consecutive_failures: u32,
    /// Cooldown after which an unselectable identity gets one more try
    probation: Duration,
    pool: RwLock<Pool>,
    cursor: AtomicUsize,
    ua_cursor: AtomicUsize,
    sticky: Mutex<Option<Identity>>,
}

// A panic while holding one of these locks leaves plain data behind, so the
// guard is recovered rather than propagated.
fn read(pool: &RwLock<Pool>) -> RwLockReadGuard<'_, Pool> {
    pool.read().unwrap_or_else(|e| e.into_inner())
}

fn write(pool: &RwLock<Pool>) -> RwLockWriteGuard<'_, Pool> {
    pool.write().unwrap_or_else(|e| e.into_inner())
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl IdentityRotator {
    /// Creates a rotator from configuration
    ///
    /// The direct identity is registered when `allow-direct` is set. Proxies
    /// are added by [`IdentityRotator::refresh`].
    pub fn new(config: &IdentityConfig, cadence: RotationCadence) -> Self {
        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            config.user_agents.clone()
        };

        let rotator = Self {
            policy: config.policy,
            cadence,
            ua_rotation: config.ua_rotation,
            user_agents,
            min_score: config.min_score,
            prune_score: config.prune_score,
            max_consecutive_failures: config.max_consecutive_failures,
            probation: Duration::from_secs(config.probation_seconds),
            pool: RwLock::new(Pool::default()),
            cursor: AtomicUsize::new(0),
            ua_cursor: AtomicUsize::new(0),
            sticky: Mutex::new(None),
        };

        if config.allow_direct {
            rotator.insert(IdentityRecord::new(DIRECT_KEY, "direct", "direct"));
        }

        rotator
    }

    pub fn cadence(&self) -> RotationCadence {
        self.cadence
    }

    /// Number of known identities, healthy or not
    pub fn len(&self) -> usize {
        read(&self.pool).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, record: IdentityRecord) -> bool {
        let mut pool = write(&self.pool);
        if pool.records.contains_key(&record.key) {
            return false;
        }
        pool.order.push(record.key.clone());
        pool.records
            .insert(record.key.clone(), Arc::new(Mutex::new(record)));
        true
    }

    /// Adds identities from a supply, keeping the health of known ones
    ///
    /// Returns the number of identities added.
    pub async fn refresh(&self, supply: &dyn IdentitySupply) -> IdentityResult<usize> {
        let candidates = supply.list_available().await?;
        Ok(self.add_candidates(candidates))
    }

    /// Adds candidates that are not yet known
    pub fn add_candidates(&self, candidates: Vec<IdentityCandidate>) -> usize {
        let added = candidates
            .into_iter()
            .filter(|c| self.insert(IdentityRecord::new(&c.key, &c.source, &c.protocol)))
            .count();
        if added > 0 {
            tracing::info!("Added {} identities ({} total)", added, self.len());
        }
        added
    }

    /// Seeds known identities with persisted health
    ///
    /// Records for identities that are no longer configured are ignored.
    pub fn load_records(&self, records: Vec<IdentityRecord>) {
        let pool = read(&self.pool);
        for record in records {
            if let Some(slot) = pool.records.get(&record.key) {
                *guard(slot) = record;
            }
        }
    }

    /// Snapshot of every record, in registration order
    pub fn records(&self) -> Vec<IdentityRecord> {
        let pool = read(&self.pool);
        pool.order
            .iter()
            .filter_map(|key| pool.records.get(key))
            .map(|slot| guard(slot).clone())
            .collect()
    }

    /// Health record of one identity
    pub fn record(&self, key: &str) -> Option<IdentityRecord> {
        read(&self.pool)
            .records
            .get(key)
            .map(|slot| guard(slot).clone())
    }

    fn is_selectable(&self, key: &str) -> bool {
        read(&self.pool)
            .records
            .get(key)
            .map(|slot| guard(slot).is_selectable(self.min_score))
            .unwrap_or(false)
    }

    /// Picks the identity for the next request
    ///
    /// When no identity is healthy and above the minimum score, the one whose
    /// probation cooldown ran out longest ago is tried. Fails with
    /// `IdentityError::Exhausted` when none is out of cooldown either.
    pub fn select(&self) -> IdentityResult<Identity> {
        if self.cadence == RotationCadence::PerSession {
            let sticky = guard(&self.sticky).clone();
            if let Some(identity) = sticky {
                if self.is_selectable(&identity.key) {
                    return Ok(identity);
                }
            }
        }

        let key = self.pick_key()?;
        let identity = Identity {
            proxy: if key == DIRECT_KEY {
                None
            } else {
                Some(key.clone())
            },
            key,
            user_agent: self.pick_user_agent(),
        };

        if self.cadence == RotationCadence::PerSession {
            tracing::debug!("Using identity {} for this session", identity.key);
            *guard(&self.sticky) = Some(identity.clone());
        }

        Ok(identity)
    }

    fn pick_key(&self) -> IdentityResult<String> {
        let pool = read(&self.pool);
        let candidates: Vec<(&String, f64)> = pool
            .order
            .iter()
            .filter_map(|key| {
                let record = guard(pool.records.get(key)?);
                record
                    .is_selectable(self.min_score)
                    .then_some((key, record.score))
            })
            .collect();

        if candidates.is_empty() {
            return self.pick_probation(&pool);
        }

        let chosen = match self.policy {
            RotationPolicy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates[index].0
            }
            RotationPolicy::Random => candidates[rand::rng().random_range(0..candidates.len())].0,
            RotationPolicy::Best => {
                candidates
                    .iter()
                    .fold(candidates[0], |best, c| if c.1 > best.1 { *c } else { best })
                    .0
            }
            RotationPolicy::Weighted => {
                let total: f64 = candidates.iter().map(|(_, s)| s.max(1.0)).sum();
                let mut target = rand::rng().random::<f64>() * total;
                let mut chosen = candidates[candidates.len() - 1].0;
                for (key, score) in &candidates {
                    target -= score.max(1.0);
                    if target <= 0.0 {
                        chosen = *key;
                        break;
                    }
                }
                chosen
            }
        };

        Ok(chosen.clone())
    }

    fn pick_probation(&self, pool: &Pool) -> IdentityResult<String> {
        let now = Utc::now();
        let (key, failed_at) = pool
            .order
            .iter()
            .filter_map(|key| {
                let record = guard(pool.records.get(key)?);
                record
                    .probation_wait(self.probation, now)
                    .is_zero()
                    .then(|| (key, record.last_failure))
            })
            .min_by_key(|(_, failed_at)| *failed_at)
            .ok_or(IdentityError::Exhausted)?;

        tracing::warn!(
            "No healthy identity left; trying {} on probation (last failure {})",
            key,
            failed_at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
        );
        Ok(key.clone())
    }

    /// Shortest wait before some identity can be selected again
    ///
    /// `None` when the pool is empty.
    pub fn probation_wait(&self) -> Option<Duration> {
        let now = Utc::now();
        let pool = read(&self.pool);
        pool.records
            .values()
            .map(|slot| {
                let record = guard(slot);
                if record.is_selectable(self.min_score) {
                    Duration::ZERO
                } else {
                    record.probation_wait(self.probation, now)
                }
            })
            .min()
    }

    fn pick_user_agent(&self) -> String {
        let index = match self.ua_rotation {
            UaRotation::Random => rand::rng().random_range(0..self.user_agents.len()),
            UaRotation::RoundRobin => {
                self.ua_cursor.fetch_add(1, Ordering::Relaxed) % self.user_agents.len()
            }
        };
        self.user_agents[index].clone()
    }

    /// Records the outcome of a request made with `identity`
    pub fn report(&self, identity: &Identity, outcome: IdentityOutcome) -> IdentityResult<()> {
        let slot = read(&self.pool)
            .records
            .get(&identity.key)
            .cloned()
            .ok_or_else(|| IdentityError::Unknown(identity.key.clone()))?;

        let mut record = guard(&slot);
        let was_healthy = record.is_healthy;
        record.apply(
            &outcome,
            self.max_consecutive_failures,
            self.prune_score,
            Utc::now(),
        );

        if was_healthy && !record.is_healthy {
            tracing::warn!(
                "Identity {} marked unhealthy (score {:.1}, {} consecutive failures)",
                record.key,
                record.score,
                record.consecutive_failures
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(policy: RotationPolicy, allow_direct: bool) -> IdentityConfig {
        IdentityConfig {
            policy,
            allow_direct,
            user_agents: vec!["UA-1".to_string(), "UA-2".to_string()],
            ua_rotation: UaRotation::RoundRobin,
            max_consecutive_failures: 2,
            ..Default::default()
        }
    }

    fn candidate(key: &str) -> IdentityCandidate {
        IdentityCandidate {
            key: key.to_string(),
            source: "config".to_string(),
            protocol: "http".to_string(),
        }
    }

    fn failure() -> IdentityOutcome {
        IdentityOutcome::Failure {
            error: "timeout".to_string(),
        }
    }

    #[test]
    fn test_direct_only() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::Weighted, true),
            RotationCadence::PerRequest,
        );
        let identity = rotator.select().unwrap();
        assert_eq!(identity.key, DIRECT_KEY);
        assert!(identity.proxy.is_none());
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::Weighted, false),
            RotationCadence::PerRequest,
        );
        assert!(matches!(rotator.select(), Err(IdentityError::Exhausted)));
    }

    #[test]
    fn test_round_robin_cycles() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, false),
            RotationCadence::PerRequest,
        );
        rotator.add_candidates(vec![candidate("http://a:1"), candidate("http://b:1")]);

        let keys: Vec<_> = (0..4).map(|_| rotator.select().unwrap().key).collect();
        assert_eq!(keys, vec!["http://a:1", "http://b:1", "http://a:1", "http://b:1"]);
    }

    #[test]
    fn test_user_agent_round_robin() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::Best, true),
            RotationCadence::PerRequest,
        );
        let first = rotator.select().unwrap().user_agent;
        let second = rotator.select().unwrap().user_agent;
        assert_ne!(first, second);
    }

    #[test]
    fn test_best_prefers_highest_score() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::Best, false),
            RotationCadence::PerRequest,
        );
        rotator.add_candidates(vec![candidate("http://a:1"), candidate("http://b:1")]);

        let b = Identity {
            key: "http://b:1".to_string(),
            proxy: Some("http://b:1".to_string()),
            user_agent: "UA-1".to_string(),
        };
        rotator
            .report(
                &b,
                IdentityOutcome::Success {
                    latency: Duration::from_millis(100),
                },
            )
            .unwrap();

        assert_eq!(rotator.select().unwrap().key, "http://b:1");
    }

    #[test]
    fn test_unhealthy_identity_is_skipped() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, true),
            RotationCadence::PerRequest,
        );
        let direct = rotator.select().unwrap();
        rotator.report(&direct, failure()).unwrap();
        rotator.report(&direct, failure()).unwrap();

        assert!(!rotator.record(DIRECT_KEY).unwrap().is_healthy);
        assert!(matches!(rotator.select(), Err(IdentityError::Exhausted)));
    }

    #[test]
    fn test_unhealthy_identity_gets_probation_after_cooldown() {
        let rotator = IdentityRotator::new(
            &IdentityConfig {
                probation_seconds: 0,
                ..config(RotationPolicy::RoundRobin, true)
            },
            RotationCadence::PerRequest,
        );
        let direct = rotator.select().unwrap();
        rotator.report(&direct, failure()).unwrap();
        rotator.report(&direct, failure()).unwrap();
        assert!(!rotator.record(DIRECT_KEY).unwrap().is_healthy);

        let retried = rotator.select().unwrap();
        assert_eq!(retried.key, DIRECT_KEY);
        rotator
            .report(
                &retried,
                IdentityOutcome::Success {
                    latency: Duration::from_millis(100),
                },
            )
            .unwrap();
        assert!(rotator.record(DIRECT_KEY).unwrap().is_healthy);
    }

    #[test]
    fn test_probation_wait_reports_cooldown() {
        let empty = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, false),
            RotationCadence::PerRequest,
        );
        assert_eq!(empty.probation_wait(), None);

        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, true),
            RotationCadence::PerRequest,
        );
        assert_eq!(rotator.probation_wait(), Some(Duration::ZERO));

        let direct = rotator.select().unwrap();
        rotator.report(&direct, failure()).unwrap();
        rotator.report(&direct, failure()).unwrap();
        let wait = rotator.probation_wait().unwrap();
        assert!(wait > Duration::from_secs(25) && wait <= Duration::from_secs(30));
    }

    #[test]
    fn test_per_session_sticks_until_unhealthy() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, false),
            RotationCadence::PerSession,
        );
        rotator.add_candidates(vec![candidate("http://a:1"), candidate("http://b:1")]);

        let first = rotator.select().unwrap();
        assert_eq!(rotator.select().unwrap(), first);

        rotator.report(&first, failure()).unwrap();
        rotator.report(&first, failure()).unwrap();

        let next = rotator.select().unwrap();
        assert_ne!(next.key, first.key);
    }

    #[test]
    fn test_weighted_only_returns_selectable() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::Weighted, false),
            RotationCadence::PerRequest,
        );
        rotator.add_candidates(vec![candidate("http://a:1"), candidate("http://b:1")]);
        let a = rotator.select().unwrap();
        let bad = Identity {
            key: "http://a:1".to_string(),
            ..a
        };
        rotator.report(&bad, failure()).unwrap();
        rotator.report(&bad, failure()).unwrap();

        for _ in 0..20 {
            assert_eq!(rotator.select().unwrap().key, "http://b:1");
        }
    }

    #[test]
    fn test_refresh_keeps_known_health() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, false),
            RotationCadence::PerRequest,
        );
        rotator.add_candidates(vec![candidate("http://a:1")]);
        let a = rotator.select().unwrap();
        rotator.report(&a, failure()).unwrap();

        let added = rotator.add_candidates(vec![candidate("http://a:1"), candidate("http://b:1")]);
        assert_eq!(added, 1);
        assert_eq!(rotator.record("http://a:1").unwrap().failed_requests, 1);
        assert_eq!(rotator.len(), 2);
    }

    #[test]
    fn test_load_records_applies_to_known_only() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, true),
            RotationCadence::PerRequest,
        );
        let mut persisted = IdentityRecord::new(DIRECT_KEY, "direct", "direct");
        persisted.total_requests = 42;
        let stranger = IdentityRecord::new("http://gone:1", "config", "http");

        rotator.load_records(vec![persisted, stranger]);
        assert_eq!(rotator.records().len(), 1);
        assert_eq!(rotator.record(DIRECT_KEY).unwrap().total_requests, 42);
    }

    #[test]
    fn test_report_unknown_identity() {
        let rotator = IdentityRotator::new(
            &config(RotationPolicy::RoundRobin, true),
            RotationCadence::PerRequest,
        );
        let ghost = Identity {
            key: "http://ghost:1".to_string(),
            ..Identity::direct("UA")
        };
        assert!(matches!(
            rotator.report(&ghost, failure()),
            Err(IdentityError::Unknown(_))
        ));
    }
}
