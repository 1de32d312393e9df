//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits
//! and of the pacing snapshot store.

use crate::backoff::SnapshotStore;
use crate::crawler::FetchOutcome;
use crate::dedup::{ContentRecord, DetectorSnapshot, DuplicateVerdict};
use crate::output::TaskResult;
use crate::pool::ResourceKind;
use crate::state::RunStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateStore, Storage, StorageError, StorageResult};
use crate::storage::RunRecord;
use crate::HarvestError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite storage backend
///
/// The connection sits behind a mutex so one instance can serve every worker.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
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
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            read_run,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                read_run,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Results =====

    fn record_outcome(
        &self,
        run_id: i64,
        outcome: &FetchOutcome,
        verdict: &DuplicateVerdict,
    ) -> StorageResult<i64> {
        let similarity = match verdict {
            DuplicateVerdict::FuzzyDuplicate { score, .. } => Some(*score),
            _ => None,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fetch_outcomes
                (run_id, url, domain, success, http_status, duration_ms, content, content_hash,
                 verdict, duplicate_of, similarity, attempt, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run_id,
                outcome.url,
                outcome.domain,
                outcome.success,
                outcome.http_status,
                outcome.duration.as_millis() as i64,
                outcome.content,
                outcome.content_hash,
                verdict.to_db_string(),
                verdict.original_url(),
                similarity,
                outcome.attempt,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_failures(&self, run_id: i64, failures: &[TaskResult]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO task_failures (run_id, url, domain, reason, attempt)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for failure in failures {
                stmt.execute(params![
                    run_id,
                    failure.url,
                    failure.domain,
                    failure.reason.as_deref().unwrap_or("unknown"),
                    failure.attempt,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_outcomes(&self) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fetch_outcomes", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    fn count_outcomes_by_verdict(&self) -> StorageResult<BTreeMap<String, u64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT verdict, COUNT(*) FROM fetch_outcomes GROUP BY verdict")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (verdict, count) = row?;
            counts.insert(verdict, count);
        }
        Ok(counts)
    }

    fn count_unique_domains(&self) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT domain) FROM fetch_outcomes",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_failures_by_reason(&self) -> StorageResult<BTreeMap<String, u64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT reason, COUNT(*) FROM task_failures GROUP BY reason")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (reason, count) = row?;
            counts.insert(reason, count);
        }
        Ok(counts)
    }

    fn load_pacing_snapshots(&self) -> StorageResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT domain, snapshot FROM backoff_models ORDER BY domain")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ===== Maintenance =====

    fn clear_state(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            DELETE FROM content_hashes;
            DELETE FROM recent_content;
            DELETE FROM backoff_models;
            DELETE FROM pool_exclusions;
        ",
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStorage {
    fn save_detector(&self, snapshot: &DetectorSnapshot) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            // the exact index only ever grows and the first URL wins
            let mut insert_hash = tx.prepare(
                "INSERT OR IGNORE INTO content_hashes (content_hash, url) VALUES (?1, ?2)",
            )?;
            for (hash, url) in &snapshot.exact {
                insert_hash.execute(params![hash, url])?;
            }

            tx.execute("DELETE FROM recent_content", [])?;
            let mut insert_recent = tx.prepare(
                "INSERT INTO recent_content
                    (position, url, content_hash, similarity_key, inserted_at, duplicate_of)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, record) in snapshot.recent.iter().enumerate() {
                let key = serde_json::to_string(&record.similarity_key)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                insert_recent.execute(params![
                    position as i64,
                    record.url,
                    record.content_hash,
                    key,
                    record.inserted_at.to_rfc3339(),
                    record.duplicate_of,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_detector(&self) -> StorageResult<Option<DetectorSnapshot>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT content_hash, url FROM content_hashes")?;
        let exact = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, String)>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT url, content_hash, similarity_key, inserted_at, duplicate_of
             FROM recent_content ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if exact.is_empty() && rows.is_empty() {
            return Ok(None);
        }

        let mut recent = Vec::with_capacity(rows.len());
        for (url, content_hash, key, inserted_at, duplicate_of) in rows {
            let similarity_key: Vec<u64> = serde_json::from_str(&key)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            recent.push(ContentRecord {
                url,
                content_hash,
                similarity_key,
                inserted_at: parse_timestamp(&inserted_at)?,
                duplicate_of,
            });
        }

        Ok(Some(DetectorSnapshot { exact, recent }))
    }

    fn save_exclusions(
        &self,
        kind: ResourceKind,
        exclusions: &[(String, DateTime<Utc>)],
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM pool_exclusions WHERE kind = ?1",
            params![kind.to_db_string()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pool_exclusions (kind, resource_id, expires_at) VALUES (?1, ?2, ?3)",
            )?;
            for (id, expires_at) in exclusions {
                stmt.execute(params![kind.to_db_string(), id, expires_at.to_rfc3339()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_exclusions(&self, kind: ResourceKind) -> StorageResult<Vec<(String, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT resource_id, expires_at FROM pool_exclusions WHERE kind = ?1 ORDER BY resource_id",
        )?;
        let rows = stmt
            .query_map(params![kind.to_db_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let mut exclusions = Vec::new();
        for (id, expires_at) in rows {
            let expires_at = parse_timestamp(&expires_at)?;
            if expires_at > now {
                exclusions.push((id, expires_at));
            }
        }
        Ok(exclusions)
    }
}

impl SnapshotStore for SqliteStorage {
    fn load_snapshot(&self, domain: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                "SELECT snapshot FROM backoff_models WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?;
        Ok(snapshot)
    }

    fn save_snapshot(&self, domain: &str, snapshot: &str) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO backoff_models (domain, snapshot, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at",
            params![domain, snapshot, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::dedup::DuplicateDetector;
    use crate::state::TaskState;
    use std::time::Duration;

    fn outcome(url: &str) -> FetchOutcome {
        FetchOutcome {
            url: url.to_string(),
            domain: "example.com".to_string(),
            success: true,
            http_status: Some(200),
            duration: Duration::from_millis(42),
            content: "<p>hello</p>".to_string(),
            content_hash: Some("abc".to_string()),
            attempt: 1,
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let storage = SqliteStorage::new_in_memory().unwrap();

        let run_id = storage.create_run("hash").unwrap();
        assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Running);

        storage.finish_run(run_id, RunStatus::Cancelled).unwrap();
        let latest = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(latest.id, run_id);
        assert_eq!(latest.status, RunStatus::Cancelled);
        assert!(latest.finished_at.is_some());

        assert!(matches!(
            storage.get_run(999),
            Err(StorageError::RunNotFound(999))
        ));
        assert!(storage.finish_run(999, RunStatus::Completed).is_err());
    }

    #[test]
    fn test_record_outcomes_and_counts() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();

        storage
            .record_outcome(run_id, &outcome("https://example.com/a"), &DuplicateVerdict::Unique)
            .unwrap();
        storage
            .record_outcome(
                run_id,
                &outcome("https://example.com/b"),
                &DuplicateVerdict::FuzzyDuplicate {
                    original_url: "https://example.com/a".to_string(),
                    score: 0.9,
                },
            )
            .unwrap();

        assert_eq!(storage.count_outcomes().unwrap(), 2);
        assert_eq!(storage.count_unique_domains().unwrap(), 1);
        let by_verdict = storage.count_outcomes_by_verdict().unwrap();
        assert_eq!(by_verdict.get("unique"), Some(&1));
        assert_eq!(by_verdict.get("fuzzy_duplicate"), Some(&1));
    }

    #[test]
    fn test_record_failures() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();

        let failures = vec![
            TaskResult {
                url: "https://example.com/x".to_string(),
                domain: "example.com".to_string(),
                state: TaskState::Failed,
                attempt: 4,
                reason: Some("retries_exhausted".to_string()),
            },
            TaskResult {
                url: "https://example.com/y".to_string(),
                domain: "example.com".to_string(),
                state: TaskState::Failed,
                attempt: 1,
                reason: Some("http_404".to_string()),
            },
        ];
        storage.record_failures(run_id, &failures).unwrap();

        let reasons = storage.count_failures_by_reason().unwrap();
        assert_eq!(reasons.get("retries_exhausted"), Some(&1));
        assert_eq!(reasons.get("http_404"), Some(&1));
    }

    #[test]
    fn test_detector_state_roundtrip() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.load_detector().unwrap().is_none());

        let config = DedupConfig {
            scan_window: 4,
            similarity_threshold: 0.8,
            shingle_size: 2,
        };
        let detector = DuplicateDetector::new(&config);
        detector.check("https://a.com/1", "alpha beta gamma delta epsilon");
        detector.check("https://b.com/1", "alpha beta gamma delta epsilon");
        storage.save_detector(&detector.snapshot()).unwrap();
        // saving twice keeps one copy of each record
        storage.save_detector(&detector.snapshot()).unwrap();

        let loaded = storage.load_detector().unwrap().unwrap();
        assert_eq!(loaded.exact.len(), 1);
        assert_eq!(loaded.recent.len(), 2);
        assert_eq!(loaded.recent[0].url, "https://a.com/1");
        assert_eq!(
            loaded.recent[1].duplicate_of.as_deref(),
            Some("https://a.com/1")
        );
        assert_eq!(loaded.recent, detector.snapshot().recent);

        let restored = DuplicateDetector::from_snapshot(&config, loaded);
        assert!(restored
            .check("https://c.com/1", "alpha beta gamma delta epsilon")
            .is_duplicate());
    }

    #[test]
    fn test_incremental_detector_saves_accumulate() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let config = DedupConfig {
            scan_window: 2,
            similarity_threshold: 0.8,
            shingle_size: 2,
        };
        let detector = DuplicateDetector::new(&config);

        detector.check("https://a.com/1", "alpha beta gamma delta");
        detector.check("https://b.com/1", "kappa lambda mu nu");
        storage.save_detector(&detector.take_unsaved()).unwrap();

        detector.check("https://c.com/1", "omicron pi rho sigma");
        let delta = detector.take_unsaved();
        assert_eq!(delta.exact.len(), 1);
        storage.save_detector(&delta).unwrap();

        let loaded = storage.load_detector().unwrap().unwrap();
        assert_eq!(loaded.exact.len(), 3);
        assert_eq!(loaded.recent.len(), 2);
        assert_eq!(loaded.recent[1].url, "https://c.com/1");
    }

    #[test]
    fn test_exclusions_skip_expired() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let now = Utc::now();

        storage
            .save_exclusions(
                ResourceKind::Egress,
                &[
                    ("http://p1:3128".to_string(), now + chrono::Duration::seconds(60)),
                    ("http://p2:3128".to_string(), now - chrono::Duration::seconds(60)),
                ],
            )
            .unwrap();

        let loaded = storage.load_exclusions(ResourceKind::Egress).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "http://p1:3128");
        assert!(storage
            .load_exclusions(ResourceKind::Identity)
            .unwrap()
            .is_empty());

        storage.save_exclusions(ResourceKind::Egress, &[]).unwrap();
        assert!(storage.load_exclusions(ResourceKind::Egress).unwrap().is_empty());
    }

    #[test]
    fn test_pacing_snapshots() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.load_snapshot("example.com").unwrap().is_none());

        storage.save_snapshot("example.com", "{\"v\":1}").unwrap();
        storage.save_snapshot("example.com", "{\"v\":2}").unwrap();
        storage.save_snapshot("other.org", "{\"v\":3}").unwrap();

        assert_eq!(
            storage.load_snapshot("example.com").unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert_eq!(storage.load_pacing_snapshots().unwrap().len(), 2);

        storage.clear_state().unwrap();
        assert!(storage.load_pacing_snapshots().unwrap().is_empty());
    }
}
