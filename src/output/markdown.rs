//! Markdown run report generation
//!
//! This module renders a `RunReport` as a human-readable markdown document,
//! including per-state counts, failure reasons and pending tasks.

use crate::output::report::RunReport;
use crate::state::TaskState;
use crate::HarvestError;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown report to a file
///
/// # Arguments
///
/// * `report` - The finished run report
/// * `run_id` - Database id of the run
/// * `output_path` - Path where the markdown file should be written
pub fn write_markdown_report(
    report: &RunReport,
    run_id: i64,
    output_path: &Path,
) -> Result<(), HarvestError> {
    let markdown = format_markdown_report(report, run_id);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_report(report: &RunReport, run_id: i64) -> String {
    let mut md = String::new();

    md.push_str("# Sumi-Harvest Run Report\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", run_id));
    md.push_str(&format!("- **Status**: {}\n", report.status));
    md.push_str(&format!(
        "- **Elapsed**: {:.1} seconds\n",
        report.elapsed.as_secs_f64()
    ));
    md.push_str(&format!("- **Tasks**: {}\n", report.total()));
    md.push_str(&format!(
        "- **Resource Exclusions**: {}\n\n",
        report.exclusion_events
    ));

    md.push_str("## Tasks by State\n\n");
    md.push_str("| State | Count |\n");
    md.push_str("|-------|-------|\n");
    for state in TaskState::all_states() {
        let count = report.count(state);
        if count > 0 {
            md.push_str(&format!("| {} | {} |\n", state, count));
        }
    }
    md.push('\n');

    if !report.failure_reasons.is_empty() {
        md.push_str("## Failure Reasons\n\n");
        md.push_str("| Reason | Count |\n");
        md.push_str("|--------|-------|\n");
        let mut reasons: Vec<_> = report.failure_reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1));
        for (reason, count) in reasons {
            md.push_str(&format!("| {} | {} |\n", reason, count));
        }
        md.push('\n');

        md.push_str("### Failed Tasks\n\n");
        for failure in report.failures() {
            md.push_str(&format!(
                "- {} (attempt {}): `{}`\n",
                failure.url,
                failure.attempt,
                failure.reason.as_deref().unwrap_or("unknown")
            ));
        }
        md.push('\n');
    }

    if !report.pending.is_empty() {
        md.push_str(&format!("## Pending Tasks ({})\n\n", report.pending.len()));
        for task in &report.pending {
            md.push_str(&format!(
                "- {} (attempt {}, priority {})\n",
                task.url, task.attempt, task.priority
            ));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FetchTask;
    use crate::output::TaskResult;
    use crate::state::RunStatus;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn create_test_report() -> RunReport {
        let mut counts = BTreeMap::new();
        counts.insert(TaskState::Succeeded, 3);
        counts.insert(TaskState::Failed, 1);

        RunReport {
            status: RunStatus::Cancelled,
            counts,
            failure_reasons: BTreeMap::from([("http_404".to_string(), 1)]),
            results: vec![TaskResult {
                url: "https://example.com/missing".to_string(),
                domain: "example.com".to_string(),
                state: TaskState::Failed,
                attempt: 1,
                reason: Some("http_404".to_string()),
            }],
            exclusion_events: 2,
            pending: vec![FetchTask::new("https://example.com/later", 4).unwrap()],
            elapsed: Duration::from_secs(12),
        }
    }

    #[test]
    fn test_format_markdown_report() {
        let md = format_markdown_report(&create_test_report(), 7);

        assert!(md.contains("# Sumi-Harvest Run Report"));
        assert!(md.contains("- **Run ID**: 7"));
        assert!(md.contains("- **Status**: cancelled"));
        assert!(md.contains("| succeeded | 3 |"));
        assert!(md.contains("| http_404 | 1 |"));
        assert!(md.contains("https://example.com/missing (attempt 1): `http_404`"));
        assert!(md.contains("## Pending Tasks (1)"));
    }

    #[test]
    fn test_write_markdown_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");

        write_markdown_report(&create_test_report(), 1, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# Sumi-Harvest Run Report"));
    }
}
