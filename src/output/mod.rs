//! Output module for run reports and statistics
//!
//! This module handles:
//! - Assembling the end-of-run report
//! - Rendering reports to stdout and markdown
//! - Loading and printing stored statistics

mod markdown;
mod report;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use report::{print_report, RunReport, TaskResult};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
