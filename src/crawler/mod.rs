//! Crawler module for scheduling and fetching tasks
//!
//! This module contains the core scheduling logic, including:
//! - The priority queue shared by all workers
//! - HTTP fetching and response classification
//! - Sinks receiving fetched content
//! - Overall run coordination

mod coordinator;
mod fetcher;
mod queue;
mod sink;
mod task;

pub use coordinator::{restore_pool_exclusions, CrawlScheduler};
pub use fetcher::{
    build_http_client, classify_response, BlockKind, FetchError, FetchRequest, FetchResponse,
    Fetcher, HttpFetcher, TaskError,
};
pub use queue::TaskQueue;
pub use sink::{MemorySink, Sink, StorageSink};
pub use task::{FetchOutcome, FetchTask};
