//! Discovery session lifecycle
//!
//! The session manager owns the session state machine and the periodic
//! checkpoints that make a crawl resumable:
//!
//! ```text
//! running ──► paused ──► running
//!    │           │
//!    ├──► interrupted ──► running (resume)
//!    ├──► failed ──────► running (resume from checkpoint)
//!    ├──► completed
//!    └──► cancelled
//! ```

mod checkpoint;

pub use checkpoint::{CheckpointState, CheckpointTimer};

use crate::config::{Config, SessionConfig};
use crate::identity::IdentityRotator;
use crate::state::{CrawlMode, SessionStatus};
use crate::storage::{self, SessionRecord, SharedStorage, Storage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} is already running or paused")]
    Conflict(String),

    #[error("Invalid session transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session {id} is {status} and cannot be resumed")]
    NotResumable { id: String, status: SessionStatus },

    #[error("Session {0} has no snapshot to resume from")]
    NoSnapshot(String),

    #[error("No resumable session found")]
    NothingToResume,

    #[error("No session is active")]
    NoActiveSession,

    #[error("Invalid snapshot for session {id}: {reason}")]
    InvalidSnapshot { id: String, reason: String },

    #[error("Failed to serialize session data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(id) => Self::Conflict(id),
            other => Self::Storage(other),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Where a resumed session picks up
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub session_id: String,
    pub mode: CrawlMode,
    pub max_depth: Option<u32>,
    pub state: CheckpointState,
}

/// Drives one session through its lifecycle
pub struct SessionManager {
    storage: SharedStorage,
    identities: Option<Arc<IdentityRotator>>,
    current: Option<String>,
    timer: CheckpointTimer,
}

impl SessionManager {
    pub fn new(storage: SharedStorage, config: &SessionConfig) -> Self {
        Self {
            storage,
            identities: None,
            current: None,
            timer: CheckpointTimer::new(
                config.checkpoint_pages,
                Duration::from_secs(config.checkpoint_seconds),
            ),
        }
    }

    /// Persists identity health from this rotator on every checkpoint
    pub fn with_identities(mut self, rotator: Arc<IdentityRotator>) -> Self {
        self.identities = Some(rotator);
        self
    }

    /// ID of the session this manager drives, once started or resumed
    pub fn session_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn current_id(&self) -> SessionResult<String> {
        self.current.clone().ok_or(SessionError::NoActiveSession)
    }

    /// Starts a new session in `running` state
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration of the run; stored as the session's config snapshot
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new session ID
    /// * `Err(SessionError::Conflict)` - Another session is running or paused
    pub fn start(&mut self, config: &Config) -> SessionResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let config_snapshot = serde_json::to_string(config)?;

        storage::lock(&self.storage)?.create_session(
            &id,
            config.crawler.mode,
            config.depth_limit(),
            &config_snapshot,
        )?;

        tracing::info!(
            "Started session {} (mode: {}, max depth: {})",
            id,
            config.crawler.mode,
            config
                .depth_limit()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );

        self.current = Some(id.clone());
        self.timer.reset();
        Ok(id)
    }

    /// Resumes a session from its last snapshot
    ///
    /// With no ID the most recent resumable session is picked. The session
    /// keeps its ID, counters and config snapshot and returns to `running`.
    pub fn resume(&mut self, session_id: Option<&str>) -> SessionResult<ResumePoint> {
        let mut store = storage::lock(&self.storage)?;

        let session = match session_id {
            Some(id) => store.get_session(id)?,
            None => store
                .get_latest_resumable_session()?
                .ok_or(SessionError::NothingToResume)?,
        };

        if !session.status.is_resumable() {
            return Err(SessionError::NotResumable {
                id: session.id,
                status: session.status,
            });
        }

        if let Some(active) = store.get_active_session(Some(&session.id))? {
            return Err(SessionError::Conflict(active.id));
        }

        let state = parse_snapshot(&session)?;
        store.update_session_status(&session.id, SessionStatus::Running)?;
        drop(store);

        tracing::info!(
            "Resuming session {} from {} ({} queued, {} pages visited)",
            session.id,
            session.status,
            state.frontier.queued(),
            state.counters.pages_visited
        );

        self.current = Some(session.id.clone());
        self.timer.reset();
        Ok(ResumePoint {
            session_id: session.id,
            mode: session.mode,
            max_depth: session.max_depth,
            state,
        })
    }

    /// Writes a checkpoint: counters, frontier snapshot and identity health
    pub fn checkpoint(&mut self, state: &CheckpointState) -> SessionResult<()> {
        let id = self.current_id()?;
        let snapshot = state.to_json()?;
        let identities = self
            .identities
            .as_ref()
            .map(|rotator| rotator.records())
            .unwrap_or_default();

        {
            let mut store = storage::lock(&self.storage)?;
            store.save_checkpoint(&id, &state.counters, &snapshot)?;
            if !identities.is_empty() {
                store.save_identities(&identities)?;
            }
        }

        tracing::debug!(
            "Checkpoint for session {}: {} queued, {} pages visited",
            id,
            state.frontier.queued(),
            state.counters.pages_visited
        );
        self.timer.reset();
        Ok(())
    }

    /// Counts one processed frontier entry toward the periodic checkpoint,
    /// whatever its outcome
    pub fn record_page(&mut self) {
        self.timer.record_page();
    }

    /// True when a periodic checkpoint should be written
    pub fn checkpoint_due(&self) -> bool {
        self.timer.is_due()
    }

    /// Checkpoints and moves the running session to `paused`
    pub fn pause(&mut self, state: &CheckpointState) -> SessionResult<()> {
        self.checkpoint(state)?;
        let id = self.current_id()?;
        self.transition(&id, SessionStatus::Paused)?;
        tracing::warn!("Session {} paused", id);
        Ok(())
    }

    /// Moves a paused session back to `running` in the same process
    pub fn unpause(&mut self) -> SessionResult<()> {
        let id = self.current_id()?;
        self.transition(&id, SessionStatus::Running)?;
        tracing::info!("Session {} running again", id);
        Ok(())
    }

    /// Marks the session as completed with its final counters
    pub fn complete(&mut self, state: &CheckpointState) -> SessionResult<()> {
        let id = self.current_id()?;
        self.checkpoint(state)?;
        self.transition(&id, SessionStatus::Completed)?;
        tracing::info!("Session {} completed", id);
        Ok(())
    }

    /// Marks the session as failed
    ///
    /// The checkpoint is best effort: a failure to write it is logged and
    /// the status change is still attempted.
    pub fn fail(&mut self, error: &str, state: Option<&CheckpointState>) -> SessionResult<()> {
        let id = self.current_id()?;
        tracing::error!("Session {} failed: {}", id, error);

        if let Some(state) = state {
            if let Err(e) = self.checkpoint(state) {
                tracing::warn!("Could not checkpoint failed session {}: {}", id, e);
            }
        }

        self.transition(&id, SessionStatus::Failed)?;
        Ok(())
    }

    /// Writes the snapshot and moves the session to `interrupted`
    ///
    /// The snapshot is on disk before this returns.
    pub fn interrupt(&mut self, state: &CheckpointState) -> SessionResult<()> {
        let id = self.current_id()?;
        self.checkpoint(state)?;
        self.transition(&id, SessionStatus::Interrupted)?;
        tracing::info!(
            "Session {} interrupted with {} URLs queued",
            id,
            state.frontier.queued()
        );
        Ok(())
    }

    /// Abandons a session for good
    pub fn cancel(&self, session_id: &str) -> SessionResult<()> {
        self.transition(session_id, SessionStatus::Cancelled)?;
        tracing::info!("Session {} cancelled", session_id);
        Ok(())
    }

    /// Moves a stale `running` session to `interrupted`
    ///
    /// Used after a crash left the row behind; the last checkpoint is kept
    /// so the session can then be resumed.
    pub fn recover(&self, session_id: &str) -> SessionResult<SessionRecord> {
        let session = self.transition(session_id, SessionStatus::Interrupted)?;
        if session.status != SessionStatus::Running {
            tracing::warn!(
                "Recovered session {} was {}, not running",
                session_id,
                session.status
            );
        }
        tracing::info!("Session {} recovered as interrupted", session_id);
        Ok(session)
    }

    /// Validates and applies a status change, returning the prior record
    fn transition(&self, id: &str, to: SessionStatus) -> SessionResult<SessionRecord> {
        let mut store = storage::lock(&self.storage)?;
        let session = store.get_session(id)?;
        if !session.status.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                id: id.to_string(),
                from: session.status,
                to,
            });
        }
        store.update_session_status(id, to)?;
        Ok(session)
    }
}

fn parse_snapshot(session: &SessionRecord) -> SessionResult<CheckpointState> {
    let raw = session
        .snapshot
        .as_deref()
        .ok_or_else(|| SessionError::NoSnapshot(session.id.clone()))?;

    CheckpointState::from_json(raw).map_err(|e| SessionError::InvalidSnapshot {
        id: session.id.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::frontier::{FrontierEntry, FrontierSnapshot};
    use crate::storage::{shared, SessionCounters, SqliteStorage};

    fn config() -> Config {
        parse_config(
            r#"
[site]
base-url = "https://example.com/"

[output]
database-path = ":memory:"
"#,
        )
        .unwrap()
    }

    fn manager() -> (SharedStorage, SessionManager) {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let manager = SessionManager::new(storage.clone(), &SessionConfig::default());
        (storage, manager)
    }

    fn state(pages: u64) -> CheckpointState {
        CheckpointState::new(
            FrontierSnapshot {
                pending: vec![FrontierEntry::new("https://example.com/next", 1, None)],
                ..Default::default()
            },
            SessionCounters {
                pages_visited: pages,
                ..Default::default()
            },
        )
    }

    fn status(storage: &SharedStorage, id: &str) -> SessionStatus {
        storage::lock(storage).unwrap().get_session(id).unwrap().status
    }

    #[test]
    fn test_start_and_complete() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        assert_eq!(manager.session_id(), Some(id.as_str()));
        assert_eq!(status(&storage, &id), SessionStatus::Running);

        manager.complete(&state(3)).unwrap();
        let record = storage::lock(&storage).unwrap().get_session(&id).unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.counters.pages_visited, 3);
        assert!(record.end_time.is_some());
    }

    #[test]
    fn test_start_conflicts_with_running_session() {
        let (storage, mut manager) = manager();
        let first = manager.start(&config()).unwrap();

        let mut other = SessionManager::new(storage, &SessionConfig::default());
        match other.start(&config()) {
            Err(SessionError::Conflict(id)) => assert_eq!(id, first),
            other => panic!("expected a conflict, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_paused_session_blocks_start_but_resumes() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.pause(&state(4)).unwrap();

        let mut other = SessionManager::new(storage.clone(), &SessionConfig::default());
        assert!(matches!(
            other.start(&config()),
            Err(SessionError::Conflict(ref active)) if *active == id
        ));

        let point = other.resume(Some(&id)).unwrap();
        assert_eq!(point.session_id, id);
        assert_eq!(status(&storage, &id), SessionStatus::Running);
    }

    #[test]
    fn test_interrupt_then_resume_keeps_id_and_state() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.interrupt(&state(50)).unwrap();
        assert_eq!(status(&storage, &id), SessionStatus::Interrupted);

        let mut resumer = SessionManager::new(storage.clone(), &SessionConfig::default());
        let point = resumer.resume(None).unwrap();
        assert_eq!(point.session_id, id);
        assert_eq!(point.mode, CrawlMode::Deep);
        assert_eq!(point.max_depth, Some(3));
        assert_eq!(point.state.counters.pages_visited, 50);
        assert_eq!(point.state.frontier.pending.len(), 1);
        assert_eq!(status(&storage, &id), SessionStatus::Running);
    }

    #[test]
    fn test_resume_requires_resumable_status() {
        let (_storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.complete(&state(1)).unwrap();

        match manager.resume(Some(&id)) {
            Err(SessionError::NotResumable { status, .. }) => {
                assert_eq!(status, SessionStatus::Completed)
            }
            other => panic!("expected NotResumable, got {:?}", other.map(|p| p.session_id)),
        }
    }

    #[test]
    fn test_resume_requires_snapshot() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        storage::lock(&storage)
            .unwrap()
            .update_session_status(&id, SessionStatus::Failed)
            .unwrap();

        assert!(matches!(
            manager.resume(Some(&id)),
            Err(SessionError::NoSnapshot(_))
        ));
    }

    #[test]
    fn test_failed_session_is_resumable_from_checkpoint() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.fail("store unavailable", Some(&state(7))).unwrap();
        assert_eq!(status(&storage, &id), SessionStatus::Failed);

        let point = manager.resume(Some(&id)).unwrap();
        assert_eq!(point.state.counters.pages_visited, 7);
    }

    #[test]
    fn test_pause_and_unpause() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.pause(&state(2)).unwrap();
        assert_eq!(status(&storage, &id), SessionStatus::Paused);
        manager.unpause().unwrap();
        assert_eq!(status(&storage, &id), SessionStatus::Running);
    }

    #[test]
    fn test_invalid_transition() {
        let (_storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.cancel(&id).unwrap();

        match manager.cancel(&id) {
            Err(SessionError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, SessionStatus::Cancelled);
                assert_eq!(to, SessionStatus::Cancelled);
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_recover_stale_running_session() {
        let (storage, mut manager) = manager();
        let id = manager.start(&config()).unwrap();
        manager.checkpoint(&state(20)).unwrap();

        // A fresh process finds the row still running
        let recovery = SessionManager::new(storage.clone(), &SessionConfig::default());
        recovery.recover(&id).unwrap();
        assert_eq!(status(&storage, &id), SessionStatus::Interrupted);

        let mut resumer = SessionManager::new(storage, &SessionConfig::default());
        assert_eq!(resumer.resume(Some(&id)).unwrap().state.counters.pages_visited, 20);
    }

    #[test]
    fn test_operations_need_an_active_session() {
        let (_storage, mut manager) = manager();
        assert!(matches!(
            manager.checkpoint(&state(0)),
            Err(SessionError::NoActiveSession)
        ));
    }

    #[test]
    fn test_checkpoint_due_after_pages() {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let mut manager = SessionManager::new(
            storage,
            &SessionConfig {
                checkpoint_pages: 2,
                checkpoint_seconds: 3600,
            },
        );
        manager.start(&config()).unwrap();
        manager.record_page();
        assert!(!manager.checkpoint_due());
        manager.record_page();
        assert!(manager.checkpoint_due());
        manager.checkpoint(&state(2)).unwrap();
        assert!(!manager.checkpoint_due());
    }
}
