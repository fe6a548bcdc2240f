//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the discovery database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per discovery run
CREATE TABLE IF NOT EXISTS discovery_sessions (
    id TEXT PRIMARY KEY,
    start_time TEXT NOT NULL,
    end_time TEXT,
    mode TEXT NOT NULL,
    max_depth INTEGER,
    total_pages_visited INTEGER NOT NULL DEFAULT 0,
    total_links_found INTEGER NOT NULL DEFAULT 0,
    new_links INTEGER NOT NULL DEFAULT 0,
    duplicates_skipped INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    blocked_events INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    interrupted_at TEXT,
    last_checkpoint TEXT,
    snapshot TEXT,
    config_snapshot TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON discovery_sessions(status);

-- Every distinct PDF link ever discovered
CREATE TABLE IF NOT EXISTS pdf_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL UNIQUE,
    source_url TEXT,
    discovery_session_id TEXT REFERENCES discovery_sessions(id),
    discovered_at TEXT NOT NULL,
    validated_at TEXT,
    status TEXT NOT NULL,
    http_status INTEGER,
    content_type TEXT,
    content_length INTEGER,
    extraction_method TEXT NOT NULL,
    extraction_confidence REAL NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    duplicate_count INTEGER NOT NULL DEFAULT 0,
    final_url TEXT,
    validation_error TEXT,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pdf_links_status ON pdf_links(status);
CREATE INDEX IF NOT EXISTS idx_pdf_links_session ON pdf_links(discovery_session_id);
CREATE INDEX IF NOT EXISTS idx_pdf_links_method ON pdf_links(extraction_method);

-- Health of outbound identities, shared across sessions
CREATE TABLE IF NOT EXISTS identity_health (
    identity_key TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    protocol TEXT NOT NULL,
    total_requests INTEGER NOT NULL DEFAULT 0,
    successful_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    avg_response_time REAL,
    score REAL NOT NULL,
    is_healthy INTEGER NOT NULL DEFAULT 1,
    last_check TEXT,
    last_success TEXT,
    last_failure TEXT,
    last_error TEXT
);

-- Audit trail of detected blocking pages
CREATE TABLE IF NOT EXISTS blocking_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES discovery_sessions(id),
    url TEXT NOT NULL,
    signal TEXT NOT NULL,
    detail TEXT NOT NULL,
    action TEXT NOT NULL,
    evidence_path TEXT,
    detected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocking_events_session ON blocking_events(session_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
