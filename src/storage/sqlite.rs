//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::identity::IdentityRecord;
use crate::state::{CrawlMode, ExtractionMethod, LinkStatus, SessionStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    BlockingEventRecord, InsertOutcome, LinkRecord, NewBlockingEvent, NewLink, SessionCounters,
    SessionRecord, ValidationUpdate,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const LINK_COLUMNS: &str = "id, url, normalized_url, source_url, discovery_session_id, discovered_at,
     validated_at, status, http_status, content_type, content_length, extraction_method,
     extraction_confidence, metadata, duplicate_count, final_url, validation_error, attempts";

const SESSION_COLUMNS: &str = "id, start_time, end_time, mode, max_depth, total_pages_visited,
     total_links_found, new_links, duplicates_skipped, errors, blocked_events, status,
     interrupted_at, last_checkpoint, snapshot, config_snapshot";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
    let metadata: String = row.get(13)?;
    Ok(LinkRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        normalized_url: row.get(2)?,
        source_url: row.get(3)?,
        session_id: row.get(4)?,
        discovered_at: row.get(5)?,
        validated_at: row.get(6)?,
        status: LinkStatus::from_db_string(&row.get::<_, String>(7)?)
            .unwrap_or(LinkStatus::Discovered),
        http_status: row.get(8)?,
        content_type: row.get(9)?,
        content_length: row.get(10)?,
        extraction_method: ExtractionMethod::from_db_string(&row.get::<_, String>(11)?)
            .unwrap_or(ExtractionMethod::PatternMatch),
        extraction_confidence: row.get(12)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        duplicate_count: row.get(14)?,
        final_url: row.get(15)?,
        validation_error: row.get(16)?,
        attempts: row.get(17)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let counter = |idx: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(idx)? as u64) };
    Ok(SessionRecord {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        mode: CrawlMode::from_db_string(&row.get::<_, String>(3)?).unwrap_or_default(),
        max_depth: row.get(4)?,
        counters: SessionCounters {
            pages_visited: counter(5)?,
            links_found: counter(6)?,
            new_links: counter(7)?,
            duplicates: counter(8)?,
            errors: counter(9)?,
            blocked: counter(10)?,
        },
        status: SessionStatus::from_db_string(&row.get::<_, String>(11)?)
            .unwrap_or(SessionStatus::Failed),
        interrupted_at: row.get(12)?,
        last_checkpoint: row.get(13)?,
        snapshot: row.get(14)?,
        config_snapshot: row.get(15)?,
    })
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<IdentityRecord> {
    Ok(IdentityRecord {
        key: row.get(0)?,
        source: row.get(1)?,
        protocol: row.get(2)?,
        total_requests: row.get::<_, i64>(3)? as u64,
        successful_requests: row.get::<_, i64>(4)? as u64,
        failed_requests: row.get::<_, i64>(5)? as u64,
        consecutive_failures: row.get(6)?,
        avg_response_time: row.get(7)?,
        score: row.get(8)?,
        is_healthy: row.get(9)?,
        last_check: parse_time(row.get(10)?),
        last_success: parse_time(row.get(11)?),
        last_failure: parse_time(row.get(12)?),
        last_error: row.get(13)?,
    })
}

fn counters_params(counters: &SessionCounters) -> [i64; 6] {
    [
        counters.pages_visited as i64,
        counters.links_found as i64,
        counters.new_links as i64,
        counters.duplicates as i64,
        counters.errors as i64,
        counters.blocked as i64,
    ]
}

impl Storage for SqliteStorage {
    // ===== Session Management =====

    fn create_session(
        &mut self,
        id: &str,
        mode: CrawlMode,
        max_depth: Option<u32>,
        config_snapshot: &str,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let active: Option<String> = tx
            .query_row(
                "SELECT id FROM discovery_sessions WHERE status IN (?1, ?2) LIMIT 1",
                params![
                    SessionStatus::Running.to_db_string(),
                    SessionStatus::Paused.to_db_string()
                ],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(active_id) = active {
            return Err(StorageError::Conflict(active_id));
        }

        tx.execute(
            "INSERT INTO discovery_sessions (id, start_time, mode, max_depth, status, config_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                now(),
                mode.to_db_string(),
                max_depth,
                SessionStatus::Running.to_db_string(),
                config_snapshot
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> StorageResult<SessionRecord> {
        let sql = format!("SELECT {} FROM discovery_sessions WHERE id = ?1", SESSION_COLUMNS);
        self.conn
            .query_row(&sql, params![id], session_from_row)
            .optional()?
            .ok_or_else(|| StorageError::SessionNotFound(id.to_string()))
    }

    fn get_active_session(&self, except: Option<&str>) -> StorageResult<Option<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM discovery_sessions
             WHERE status IN (?1, ?2) AND (?3 IS NULL OR id != ?3)
             ORDER BY start_time DESC LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![
                    SessionStatus::Running.to_db_string(),
                    SessionStatus::Paused.to_db_string(),
                    except
                ],
                session_from_row,
            )
            .optional()?)
    }

    fn get_latest_resumable_session(&self) -> StorageResult<Option<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM discovery_sessions
             WHERE status IN (?1, ?2, ?3) AND snapshot IS NOT NULL
             ORDER BY start_time DESC, rowid DESC LIMIT 1",
            SESSION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![
                    SessionStatus::Interrupted.to_db_string(),
                    SessionStatus::Paused.to_db_string(),
                    SessionStatus::Failed.to_db_string()
                ],
                session_from_row,
            )
            .optional()?)
    }

    fn list_sessions(&self, limit: usize) -> StorageResult<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM discovery_sessions ORDER BY start_time DESC, rowid DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![limit as i64], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn update_session_status(&mut self, id: &str, status: SessionStatus) -> StorageResult<()> {
        let timestamp = now();
        let changed = match status {
            SessionStatus::Running | SessionStatus::Paused => self.conn.execute(
                "UPDATE discovery_sessions SET status = ?1, end_time = NULL WHERE id = ?2",
                params![status.to_db_string(), id],
            )?,
            SessionStatus::Interrupted => self.conn.execute(
                "UPDATE discovery_sessions SET status = ?1, end_time = ?2, interrupted_at = ?2 WHERE id = ?3",
                params![status.to_db_string(), timestamp, id],
            )?,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled => {
                self.conn.execute(
                    "UPDATE discovery_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
                    params![status.to_db_string(), timestamp, id],
                )?
            }
        };

        if changed == 0 {
            return Err(StorageError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn save_checkpoint(
        &mut self,
        id: &str,
        counters: &SessionCounters,
        snapshot: &str,
    ) -> StorageResult<()> {
        let c = counters_params(counters);
        let changed = self.conn.execute(
            "UPDATE discovery_sessions SET total_pages_visited = ?1, total_links_found = ?2,
             new_links = ?3, duplicates_skipped = ?4, errors = ?5, blocked_events = ?6,
             snapshot = ?7, last_checkpoint = ?8 WHERE id = ?9",
            params![c[0], c[1], c[2], c[3], c[4], c[5], snapshot, now(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn count_sessions_by_status(&self) -> StorageResult<HashMap<SessionStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM discovery_sessions GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = SessionStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Link Management =====

    fn link_exists(&self, normalized_url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM pdf_links WHERE normalized_url = ?1",
                params![normalized_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_link(&mut self, link: &NewLink) -> StorageResult<InsertOutcome> {
        let metadata = serde_json::to_string(&link.metadata)?;
        let inserted = self.conn.execute(
            "INSERT INTO pdf_links (url, normalized_url, source_url, discovery_session_id,
             discovered_at, status, extraction_method, extraction_confidence, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(normalized_url) DO NOTHING",
            params![
                link.url,
                link.normalized_url,
                link.source_url,
                link.session_id,
                now(),
                LinkStatus::Discovered.to_db_string(),
                link.method.to_db_string(),
                link.confidence.clamp(0.0, 1.0),
                metadata
            ],
        )?;

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted(self.conn.last_insert_rowid()));
        }

        self.conn.execute(
            "UPDATE pdf_links SET duplicate_count = duplicate_count + 1 WHERE normalized_url = ?1",
            params![link.normalized_url],
        )?;
        let (id, duplicate_count) = self.conn.query_row(
            "SELECT id, duplicate_count FROM pdf_links WHERE normalized_url = ?1",
            params![link.normalized_url],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)),
        )?;
        Ok(InsertOutcome::Duplicate {
            id,
            duplicate_count,
        })
    }

    fn get_link(&self, normalized_url: &str) -> StorageResult<Option<LinkRecord>> {
        let sql = format!("SELECT {} FROM pdf_links WHERE normalized_url = ?1", LINK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![normalized_url], link_from_row)
            .optional()?)
    }

    fn get_links(
        &self,
        status: Option<LinkStatus>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<LinkRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let links = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM pdf_links WHERE status = ?1 ORDER BY id LIMIT ?2",
                    LINK_COLUMNS
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![status.to_db_string(), limit], link_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!("SELECT {} FROM pdf_links ORDER BY id LIMIT ?1", LINK_COLUMNS);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit], link_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(links)
    }

    fn all_link_urls(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM pdf_links ORDER BY id")?;
        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn update_link_validation(
        &mut self,
        id: i64,
        update: &ValidationUpdate,
    ) -> StorageResult<()> {
        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM pdf_links WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = current
            .and_then(|s| LinkStatus::from_db_string(&s))
            .ok_or_else(|| StorageError::LinkNotFound(format!("Link ID {}", id)))?;

        if !current.can_transition_to(update.status) {
            return Err(StorageError::InvalidTransition {
                from: current,
                to: update.status,
            });
        }

        self.conn.execute(
            "UPDATE pdf_links SET status = ?1, validated_at = ?2, http_status = ?3,
             content_type = ?4, content_length = ?5, final_url = ?6, validation_error = ?7,
             attempts = attempts + 1
             WHERE id = ?8",
            params![
                update.status.to_db_string(),
                now(),
                update.http_status,
                update.content_type,
                update.content_length,
                update.final_url,
                update.error,
                id
            ],
        )?;
        Ok(())
    }

    fn count_links(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pdf_links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_links_by_status(&self) -> StorageResult<HashMap<LinkStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM pdf_links GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = LinkStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn count_links_by_method(&self) -> StorageResult<HashMap<ExtractionMethod, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT extraction_method, COUNT(*) FROM pdf_links GROUP BY extraction_method",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (method, count) = row?;
            if let Some(method) = ExtractionMethod::from_db_string(&method) {
                counts.insert(method, count as u64);
            }
        }
        Ok(counts)
    }

    fn total_duplicates(&self) -> StorageResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(duplicate_count), 0) FROM pdf_links",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    // ===== Identity Health =====

    fn save_identities(&mut self, records: &[IdentityRecord]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO identity_health (identity_key, source, protocol,
                 total_requests, successful_requests, failed_requests, consecutive_failures,
                 avg_response_time, score, is_healthy, last_check, last_success, last_failure,
                 last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;

            for record in records {
                stmt.execute(params![
                    record.key,
                    record.source,
                    record.protocol,
                    record.total_requests as i64,
                    record.successful_requests as i64,
                    record.failed_requests as i64,
                    record.consecutive_failures,
                    record.avg_response_time,
                    record.score,
                    record.is_healthy,
                    record.last_check.map(|t| t.to_rfc3339()),
                    record.last_success.map(|t| t.to_rfc3339()),
                    record.last_failure.map(|t| t.to_rfc3339()),
                    record.last_error,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_identities(&self) -> StorageResult<Vec<IdentityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_key, source, protocol, total_requests, successful_requests,
             failed_requests, consecutive_failures, avg_response_time, score, is_healthy,
             last_check, last_success, last_failure, last_error
             FROM identity_health ORDER BY identity_key",
        )?;
        let records = stmt
            .query_map([], identity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ===== Blocking Events =====

    fn record_blocking_event(&mut self, event: &NewBlockingEvent) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO blocking_events (session_id, url, signal, detail, action, evidence_path, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.session_id,
                event.url,
                event.signal,
                event.detail,
                event.action,
                event.evidence_path,
                now()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_blocking_events(
        &self,
        session_id: Option<&str>,
    ) -> StorageResult<Vec<BlockingEventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, url, signal, detail, action, evidence_path, detected_at
             FROM blocking_events
             WHERE ?1 IS NULL OR session_id = ?1
             ORDER BY id",
        )?;
        let events = stmt
            .query_map(params![session_id], |row| {
                Ok(BlockingEventRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    url: row.get(2)?,
                    signal: row.get(3)?,
                    detail: row.get(4)?,
                    action: row.get(5)?,
                    evidence_path: row.get(6)?,
                    detected_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}
