//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track scheduler runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Every successfully fetched response, duplicates included
CREATE TABLE IF NOT EXISTS fetch_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    success INTEGER NOT NULL,
    http_status INTEGER,
    duration_ms INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT,
    verdict TEXT NOT NULL,
    duplicate_of TEXT,
    similarity REAL,
    attempt INTEGER NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fetch_outcomes_domain ON fetch_outcomes(domain);
CREATE INDEX IF NOT EXISTS idx_fetch_outcomes_verdict ON fetch_outcomes(verdict);

-- Tasks that ended without content
CREATE TABLE IF NOT EXISTS task_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempt INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_failures_reason ON task_failures(reason);

-- Exact duplicate index: first URL seen for each normalized content hash
CREATE TABLE IF NOT EXISTS content_hashes (
    content_hash TEXT PRIMARY KEY,
    url TEXT NOT NULL
);

-- Recency window for near-duplicate detection, oldest first
CREATE TABLE IF NOT EXISTS recent_content (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    similarity_key TEXT NOT NULL,
    inserted_at TEXT NOT NULL,
    duplicate_of TEXT
);

-- Opaque per-domain pacing snapshots
CREATE TABLE IF NOT EXISTS backoff_models (
    domain TEXT PRIMARY KEY,
    snapshot TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Resource exclusions, only written when persistence is enabled
CREATE TABLE IF NOT EXISTS pool_exclusions (
    kind TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (kind, resource_id)
);
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

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = vec![
            "runs",
            "fetch_outcomes",
            "task_failures",
            "content_hashes",
            "recent_content",
            "backoff_models",
            "pool_exclusions",
        ];

        for table in tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
