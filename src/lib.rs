//! Sumi-Harvest: an abuse-aware bulk fetch scheduler
//!
//! This crate schedules large numbers of fetch tasks across a bounded worker
//! pool while leasing proxies and client identities with temporary exclusion,
//! tagging duplicate content, and adapting per-domain pacing online.

pub mod backoff;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod output;
pub mod pool;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Backoff error: {0}")]
    Backoff(#[from] backoff::BackoffError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use backoff::{BackoffController, DomainHealth, PacingAction, PacingOutcome};
pub use config::Config;
pub use crawler::{CrawlScheduler, FetchTask, Fetcher, Sink};
pub use dedup::{DuplicateDetector, DuplicateVerdict};
pub use pool::{LeasedResource, ResourceKind, ResourcePool};
pub use state::{RunStatus, TaskState};
