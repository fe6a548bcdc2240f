//! Storage module for persisting discovery data
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - The deduplicated PDF link catalog
//! - Session lifecycle rows and resume snapshots
//! - Identity health shared across sessions
//! - Blocking event audit trail

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{CrawlMode, ExtractionMethod, LinkStatus, SessionStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between the orchestrator, the session manager and workers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend for shared use
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared storage handle, mapping poisoning to a storage error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|e| StorageError::Lock(format!("Failed to lock storage: {}", e)))
}

/// A link about to be inserted into the catalog
#[derive(Debug, Clone)]
pub struct NewLink {
    pub url: String,
    pub normalized_url: String,
    pub source_url: Option<String>,
    pub session_id: Option<String>,
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

/// Result of inserting a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this normalized URL was seen
    Inserted(i64),
    /// Already stored; the duplicate counter was incremented
    Duplicate { id: i64, duplicate_count: u32 },
}

impl InsertOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Represents a discovered link in the database
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub id: i64,
    pub url: String,
    pub normalized_url: String,
    pub source_url: Option<String>,
    pub session_id: Option<String>,
    pub discovered_at: String,
    pub validated_at: Option<String>,
    pub status: LinkStatus,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub extraction_method: ExtractionMethod,
    pub extraction_confidence: f64,
    pub metadata: serde_json::Value,
    pub duplicate_count: u32,
    pub final_url: Option<String>,
    pub validation_error: Option<String>,
    pub attempts: u32,
}

/// Outcome of a validation check, written back to a link
#[derive(Debug, Clone)]
pub struct ValidationUpdate {
    pub status: LinkStatus,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub final_url: Option<String>,
    pub error: Option<String>,
}

/// Per-session counters, checkpointed with the frontier snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub pages_visited: u64,
    pub links_found: u64,
    pub new_links: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub blocked: u64,
}

/// Represents a discovery session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub mode: CrawlMode,
    pub max_depth: Option<u32>,
    pub counters: SessionCounters,
    pub status: SessionStatus,
    pub interrupted_at: Option<String>,
    pub last_checkpoint: Option<String>,
    pub snapshot: Option<String>,
    pub config_snapshot: String,
}

/// A blocking event about to be recorded
#[derive(Debug, Clone)]
pub struct NewBlockingEvent {
    pub session_id: String,
    pub url: String,
    pub signal: String,
    pub detail: String,
    pub action: String,
    pub evidence_path: Option<String>,
}

/// Represents a recorded blocking event
#[derive(Debug, Clone)]
pub struct BlockingEventRecord {
    pub id: i64,
    pub session_id: String,
    pub url: String,
    pub signal: String,
    pub detail: String,
    pub action: String,
    pub evidence_path: Option<String>,
    pub detected_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_outcome_is_new() {
        assert!(InsertOutcome::Inserted(1).is_new());
        assert!(!InsertOutcome::Duplicate {
            id: 1,
            duplicate_count: 2
        }
        .is_new());
    }

    #[test]
    fn test_counters_serialize() {
        let counters = SessionCounters {
            pages_visited: 50,
            new_links: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&counters).unwrap();
        let back: SessionCounters = serde_json::from_str(&json).unwrap();
        assert_eq!(counters, back);
    }

    #[test]
    fn test_lock_shared_storage() {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let guard = lock(&storage).unwrap();
        assert_eq!(guard.count_links().unwrap(), 0);
    }
}
