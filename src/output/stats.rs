//! Statistics generation from the configured sink
//!
//! This module provides functionality for extracting and displaying
//! what a sink has persisted, without running a crawl.

use crate::config::OutputConfig;
use crate::storage::{open_sink, SinkStats};
use crate::HarvestError;

/// Loads statistics from the sink selected by `config`
///
/// # Arguments
///
/// * `config` - The output section of the configuration
///
/// # Returns
///
/// * `Ok(SinkStats)` - Successfully loaded statistics
/// * `Err(HarvestError)` - The sink could not be opened or queried
pub fn load_statistics(config: &OutputConfig) -> Result<SinkStats, HarvestError> {
    let sink = open_sink(config)?;
    Ok(sink.stats()?)
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &SinkStats) {
    println!("=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  Run ID: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Config hash: {}", run.config_hash);
        println!();
    }

    println!("Output:");
    println!("  Records: {}", stats.records);
    println!("  Permanent failures: {}", stats.failures);
    println!();

    if stats.checkpoint_visited > 0 || stats.checkpoint_pending > 0 {
        println!("Checkpoint:");
        println!("  Visited: {}", stats.checkpoint_visited);
        println!("  Pending: {}", stats.checkpoint_pending);
        println!();
    } else {
        println!("No resumable checkpoint.\n");
    }

    if !stats.failure_reasons.is_empty() {
        println!("Failure Reasons:");
        for (reason, count) in &stats.failure_reasons {
            let percentage = if stats.failures > 0 {
                (*count as f64 / stats.failures as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", reason, count, percentage);
        }
    }
}
