//! Destinations for fetched content

use crate::crawler::task::FetchOutcome;
use crate::dedup::DuplicateVerdict;
use crate::storage::{SqliteStorage, Storage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives every successfully fetched response along with its duplicate verdict
///
/// Duplicates are delivered too, so the consumer decides whether to keep them.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn accept(&self, outcome: FetchOutcome, verdict: DuplicateVerdict) -> crate::Result<()>;
}

/// Writes outcomes into the `fetch_outcomes` table of a run
pub struct StorageSink {
    storage: Arc<SqliteStorage>,
    run_id: i64,
}

impl StorageSink {
    pub fn new(storage: Arc<SqliteStorage>, run_id: i64) -> Self {
        Self { storage, run_id }
    }
}

#[async_trait]
impl Sink for StorageSink {
    async fn accept(&self, outcome: FetchOutcome, verdict: DuplicateVerdict) -> crate::Result<()> {
        let id = self.storage.record_outcome(self.run_id, &outcome, &verdict)?;
        tracing::debug!("Stored outcome {} for {} ({})", id, outcome.url, verdict);
        Ok(())
    }
}

/// Keeps outcomes in memory, mostly useful for tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(FetchOutcome, DuplicateVerdict)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything accepted so far, in arrival order
    pub fn records(&self) -> Vec<(FetchOutcome, DuplicateVerdict)> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn accept(&self, outcome: FetchOutcome, verdict: DuplicateVerdict) -> crate::Result<()> {
        self.records.lock().push((outcome, verdict));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(url: &str) -> FetchOutcome {
        FetchOutcome {
            url: url.to_string(),
            domain: "example.com".to_string(),
            success: true,
            http_status: Some(200),
            duration: Duration::from_millis(5),
            content: "body".to_string(),
            content_hash: None,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.accept(outcome("https://example.com/1"), DuplicateVerdict::Unique)
            .await
            .unwrap();
        sink.accept(
            outcome("https://example.com/2"),
            DuplicateVerdict::ExactDuplicate {
                original_url: "https://example.com/1".to_string(),
            },
        )
        .await
        .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0.url, "https://example.com/1");
        assert!(records[1].1.is_duplicate());
    }

    #[tokio::test]
    async fn test_storage_sink_records_outcome() {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let run_id = storage.create_run("hash").unwrap();
        let sink = StorageSink::new(storage.clone(), run_id);

        sink.accept(outcome("https://example.com/1"), DuplicateVerdict::Unique)
            .await
            .unwrap();

        assert_eq!(storage.count_outcomes().unwrap(), 1);
    }
}
