//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! stored outcome statistics from the storage layer.

use crate::backoff::PacingSnapshot;
use crate::storage::{RunRecord, Storage};
use crate::HarvestError;
use std::collections::BTreeMap;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Total number of stored outcomes
    pub total_outcomes: u64,

    /// Stored outcomes by duplicate verdict
    pub outcomes_by_verdict: BTreeMap<String, u64>,

    /// Number of unique domains with stored outcomes
    pub unique_domains: u64,

    /// Failed tasks by reason code, all runs combined
    pub failures_by_reason: BTreeMap<String, u64>,

    /// Persisted pacing multiplier per domain
    pub domain_multipliers: BTreeMap<String, f64>,
}

impl HarvestStatistics {
    pub fn total_failures(&self) -> u64 {
        self.failures_by_reason.values().sum()
    }

    pub fn duplicates(&self) -> u64 {
        self.outcomes_by_verdict
            .iter()
            .filter(|(verdict, _)| verdict.as_str() != "unique")
            .map(|(_, count)| count)
            .sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics, HarvestError> {
    let latest_run = storage.get_latest_run()?;
    let total_outcomes = storage.count_outcomes()?;
    let outcomes_by_verdict = storage.count_outcomes_by_verdict()?;
    let unique_domains = storage.count_unique_domains()?;
    let failures_by_reason = storage.count_failures_by_reason()?;

    let mut domain_multipliers = BTreeMap::new();
    for (domain, json) in storage.load_pacing_snapshots()? {
        match PacingSnapshot::decode(&json) {
            Ok(snapshot) => {
                domain_multipliers.insert(domain, snapshot.multiplier);
            }
            Err(e) => tracing::warn!("Unreadable pacing snapshot for {}: {}", domain, e),
        }
    }

    Ok(HarvestStatistics {
        latest_run,
        total_outcomes,
        outcomes_by_verdict,
        unique_domains,
        failures_by_reason,
        domain_multipliers,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  ID: {}", run.id);
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Status: {}", run.status);
        println!();
    }

    println!("Overview:");
    println!("  Stored outcomes: {}", stats.total_outcomes);
    println!("  Unique domains: {}", stats.unique_domains);
    println!("  Failed tasks: {}", stats.total_failures());
    println!();

    if !stats.outcomes_by_verdict.is_empty() {
        println!("Outcomes by Verdict:");
        for (verdict, count) in &stats.outcomes_by_verdict {
            let percentage = if stats.total_outcomes > 0 {
                (*count as f64 / stats.total_outcomes as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", verdict, count, percentage);
        }
        println!();
    }

    if !stats.failures_by_reason.is_empty() {
        println!("Failure Reasons:");
        let mut reasons: Vec<_> = stats.failures_by_reason.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1));

        for (reason, count) in reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    if !stats.domain_multipliers.is_empty() {
        println!("Pacing Multipliers ({} domains):", stats.domain_multipliers.len());
        for (domain, multiplier) in &stats.domain_multipliers {
            println!("  {}: {:.2}", domain, multiplier);
        }
        println!();
    }

    let duplicate_rate = if stats.total_outcomes > 0 {
        (stats.duplicates() as f64 / stats.total_outcomes as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Duplicate Rate: {:.1}% ({} / {} outcomes)",
        duplicate_rate,
        stats.duplicates(),
        stats.total_outcomes
    );
}
