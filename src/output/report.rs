//! End-of-run report
//!
//! A `RunReport` is assembled by the scheduler once every worker has stopped.
//! It is purely in-memory; failed tasks are also written to storage by the
//! binary so `--stats` can show them later.

use crate::crawler::FetchTask;
use crate::state::{RunStatus, TaskState};
use std::collections::BTreeMap;
use std::time::Duration;

/// Final (or last known) state of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub url: String,
    pub domain: String,
    pub state: TaskState,

    /// Attempt number of the last fetch
    pub attempt: u32,

    /// Reason code for failed tasks
    pub reason: Option<String>,
}

/// Summary of a scheduler run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,

    /// Number of tasks per state, terminal or not
    pub counts: BTreeMap<TaskState, u64>,

    /// Reason code histogram over failed tasks
    pub failure_reasons: BTreeMap<String, u64>,

    /// Every task known to the scheduler, sorted by URL
    pub results: Vec<TaskResult>,

    /// Resource exclusions applied during the run, both pools combined
    pub exclusion_events: u64,

    /// Tasks still queued when the run stopped, in dequeue order
    pub pending: Vec<FetchTask>,

    pub elapsed: Duration,
}

impl RunReport {
    pub fn count(&self, state: TaskState) -> u64 {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn result_for(&self, url: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.url == url)
    }

    /// Results of tasks that ended `Failed`
    pub fn failures(&self) -> Vec<TaskResult> {
        self.results
            .iter()
            .filter(|r| r.state == TaskState::Failed)
            .cloned()
            .collect()
    }
}

/// Prints a run report to stdout
pub fn print_report(report: &RunReport) {
    println!("=== Run Report ===\n");

    println!("Status: {}", report.status);
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!("Tasks: {}", report.total());
    println!();

    println!("Tasks by State:");
    for (state, count) in &report.counts {
        let percentage = if report.total() > 0 {
            (*count as f64 / report.total() as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    if !report.failure_reasons.is_empty() {
        println!("Failure Reasons:");
        let mut reasons: Vec<_> = report.failure_reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (reason, count) in reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    println!("Resource exclusions: {}", report.exclusion_events);

    if !report.pending.is_empty() {
        println!();
        println!("Pending Tasks ({}):", report.pending.len());
        for task in &report.pending {
            println!("  - {} (attempt {}, priority {})", task.url, task.attempt, task.priority);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, state: TaskState, reason: Option<&str>) -> TaskResult {
        TaskResult {
            url: url.to_string(),
            domain: "example.com".to_string(),
            state,
            attempt: 1,
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_report_accessors() {
        let mut counts = BTreeMap::new();
        counts.insert(TaskState::Succeeded, 2);
        counts.insert(TaskState::Failed, 1);

        let report = RunReport {
            status: RunStatus::Completed,
            counts,
            failure_reasons: BTreeMap::from([("http_404".to_string(), 1)]),
            results: vec![
                result("https://example.com/a", TaskState::Succeeded, None),
                result("https://example.com/b", TaskState::Succeeded, None),
                result("https://example.com/c", TaskState::Failed, Some("http_404")),
            ],
            exclusion_events: 0,
            pending: Vec::new(),
            elapsed: Duration::from_secs(1),
        };

        assert_eq!(report.total(), 3);
        assert_eq!(report.count(TaskState::Succeeded), 2);
        assert_eq!(report.count(TaskState::Duplicate), 0);
        assert_eq!(
            report.result_for("https://example.com/c").and_then(|r| r.reason.as_deref()),
            Some("http_404")
        );
        assert_eq!(report.failures().len(), 1);
    }
}
