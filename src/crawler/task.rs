//! Fetch tasks and the outcomes handed to sinks

use crate::url::parse_task_url;
use crate::UrlResult;
use std::time::Duration;
use url::Url;

/// A URL to fetch, with its scheduling metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// Lower values are dequeued first
    pub priority: u32,

    pub url: Url,

    /// Lowercased host of `url`, the key for pacing and block attribution
    pub domain: String,

    /// 1-based number of the next fetch attempt
    pub attempt: u32,
}

impl FetchTask {
    /// Creates a first-attempt task from a URL string
    pub fn new(url: &str, priority: u32) -> UrlResult<Self> {
        let (url, domain) = parse_task_url(url)?;
        Ok(Self {
            priority,
            url,
            domain,
            attempt: 1,
        })
    }

    /// Moves the task to its next attempt, lowering its priority
    pub fn advance_attempt(&mut self, priority_penalty: u32) {
        self.attempt += 1;
        self.priority = self.priority.saturating_add(priority_penalty);
    }
}

/// A successfully fetched response, as delivered to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub url: String,
    pub domain: String,
    pub success: bool,
    pub http_status: Option<u16>,
    pub duration: Duration,
    pub content: String,

    /// Hash of the normalized content
    pub content_hash: Option<String>,

    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task() {
        let task = FetchTask::new("https://Example.COM/page#top", 3).unwrap();
        assert_eq!(task.domain, "example.com");
        assert_eq!(task.url.as_str(), "https://example.com/page");
        assert_eq!(task.attempt, 1);
        assert_eq!(task.priority, 3);

        assert!(FetchTask::new("ftp://example.com/file", 0).is_err());
    }

    #[test]
    fn test_advance_attempt() {
        let mut task = FetchTask::new("https://example.com/", u32::MAX - 1).unwrap();
        task.advance_attempt(5);
        assert_eq!(task.attempt, 2);
        assert_eq!(task.priority, u32::MAX);
    }
}
