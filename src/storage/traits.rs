//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types.

use crate::crawler::FetchOutcome;
use crate::dedup::{DetectorSnapshot, DuplicateVerdict};
use crate::output::TaskResult;
use crate::pool::ResourceKind;
use crate::state::RunStatus;
use crate::storage::RunRecord;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Run bookkeeping, fetched results and statistics
///
/// Implementations synchronize internally so they can be shared by all
/// workers of a run.
pub trait Storage: Send + Sync {
    // ===== Run Management =====

    /// Creates a new run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as finished with the given status
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Results =====

    /// Stores a fetched response along with its duplicate verdict
    fn record_outcome(
        &self,
        run_id: i64,
        outcome: &FetchOutcome,
        verdict: &DuplicateVerdict,
    ) -> StorageResult<i64>;

    /// Stores the failed tasks of a run
    fn record_failures(&self, run_id: i64, failures: &[TaskResult]) -> StorageResult<()>;

    // ===== Statistics =====

    /// Gets total stored outcome count
    fn count_outcomes(&self) -> StorageResult<u64>;

    /// Counts stored outcomes per verdict
    fn count_outcomes_by_verdict(&self) -> StorageResult<BTreeMap<String, u64>>;

    /// Gets count of unique domains with stored outcomes
    fn count_unique_domains(&self) -> StorageResult<u64>;

    /// Counts recorded failures per reason code
    fn count_failures_by_reason(&self) -> StorageResult<BTreeMap<String, u64>>;

    /// Gets every stored pacing snapshot as `(domain, snapshot)`
    fn load_pacing_snapshots(&self) -> StorageResult<Vec<(String, String)>>;

    // ===== Maintenance =====

    /// Drops detector, pacing and exclusion state while keeping history
    fn clear_state(&self) -> StorageResult<()>;
}

/// Persistence of detector state and resource exclusions between runs
pub trait StateStore: Send + Sync {
    /// Merges `snapshot.exact` into the stored index and replaces the
    /// stored recency window
    ///
    /// Hashes already stored keep their first URL, so callers may pass only
    /// the entries added since their last save.
    fn save_detector(&self, snapshot: &DetectorSnapshot) -> StorageResult<()>;

    fn load_detector(&self) -> StorageResult<Option<DetectorSnapshot>>;

    /// Replaces the stored exclusions of one pool with absolute expiries
    fn save_exclusions(
        &self,
        kind: ResourceKind,
        exclusions: &[(String, DateTime<Utc>)],
    ) -> StorageResult<()>;

    /// Loads exclusions of one pool that have not yet expired
    fn load_exclusions(&self, kind: ResourceKind) -> StorageResult<Vec<(String, DateTime<Utc>)>>;
}
