//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::identity::IdentityRecord;
use crate::state::{CrawlMode, ExtractionMethod, LinkStatus, SessionStatus};
use crate::storage::{
    BlockingEventRecord, InsertOutcome, LinkRecord, NewBlockingEvent, NewLink, SessionCounters,
    SessionRecord, ValidationUpdate,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Link not found: {0}")]
    LinkNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is already running or paused")]
    Conflict(String),

    #[error("Invalid link status transition: {from} -> {to}")]
    InvalidTransition { from: LinkStatus, to: LinkStatus },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// The store is the single source of truth for deduplication and resume.
/// Callers share one instance behind a mutex, so every method runs
/// serialized with respect to the others.
pub trait Storage {
    // ===== Session Management =====

    /// Creates a new session in `running` state
    ///
    /// Fails with `StorageError::Conflict` when another session is running
    /// or paused; the check and the insert happen in one transaction.
    fn create_session(
        &mut self,
        id: &str,
        mode: CrawlMode,
        max_depth: Option<u32>,
        config_snapshot: &str,
    ) -> StorageResult<()>;

    /// Gets a session by ID
    fn get_session(&self, id: &str) -> StorageResult<SessionRecord>;

    /// Gets a running or paused session other than `except`, if any
    fn get_active_session(&self, except: Option<&str>) -> StorageResult<Option<SessionRecord>>;

    /// Gets the most recent session that can be resumed
    fn get_latest_resumable_session(&self) -> StorageResult<Option<SessionRecord>>;

    /// Lists sessions, newest first
    fn list_sessions(&self, limit: usize) -> StorageResult<Vec<SessionRecord>>;

    /// Moves a session to a new status
    ///
    /// Terminal and interrupted statuses stamp `end_time`; `interrupted`
    /// also stamps `interrupted_at`. Moving back to `running` clears `end_time`.
    fn update_session_status(&mut self, id: &str, status: SessionStatus) -> StorageResult<()>;

    /// Persists counters and an opaque frontier snapshot
    fn save_checkpoint(
        &mut self,
        id: &str,
        counters: &SessionCounters,
        snapshot: &str,
    ) -> StorageResult<()>;

    /// Counts sessions by status
    fn count_sessions_by_status(&self) -> StorageResult<HashMap<SessionStatus, u64>>;

    // ===== Link Management =====

    /// Returns true if a link with this normalized URL is stored
    fn link_exists(&self, normalized_url: &str) -> StorageResult<bool>;

    /// Inserts a link or bumps the duplicate counter of the existing row
    fn insert_link(&mut self, link: &NewLink) -> StorageResult<InsertOutcome>;

    /// Gets a link by normalized URL
    fn get_link(&self, normalized_url: &str) -> StorageResult<Option<LinkRecord>>;

    /// Gets links, optionally filtered by status, oldest first
    fn get_links(
        &self,
        status: Option<LinkStatus>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<LinkRecord>>;

    /// Gets the raw URL of every stored link
    fn all_link_urls(&self) -> StorageResult<Vec<String>>;

    /// Writes a validation outcome to a link
    ///
    /// The status change must be allowed by the link lifecycle.
    fn update_link_validation(&mut self, id: i64, update: &ValidationUpdate)
        -> StorageResult<()>;

    /// Counts all stored links
    fn count_links(&self) -> StorageResult<u64>;

    /// Counts links by status
    fn count_links_by_status(&self) -> StorageResult<HashMap<LinkStatus, u64>>;

    /// Counts links by extraction method
    fn count_links_by_method(&self) -> StorageResult<HashMap<ExtractionMethod, u64>>;

    /// Sum of duplicate counters across all links
    fn total_duplicates(&self) -> StorageResult<u64>;

    // ===== Identity Health =====

    /// Inserts or replaces identity health rows
    fn save_identities(&mut self, records: &[IdentityRecord]) -> StorageResult<()>;

    /// Loads every identity health row
    fn load_identities(&self) -> StorageResult<Vec<IdentityRecord>>;

    // ===== Blocking Events =====

    /// Records a blocking event and returns its ID
    fn record_blocking_event(&mut self, event: &NewBlockingEvent) -> StorageResult<i64>;

    /// Gets blocking events, optionally for one session
    fn get_blocking_events(
        &self,
        session_id: Option<&str>,
    ) -> StorageResult<Vec<BlockingEventRecord>>;
}
