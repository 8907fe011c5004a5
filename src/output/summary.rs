//! End-of-crawl summary

use crate::crawler::DispatchCounts;
use std::time::Duration;

/// What a single crawl invocation accomplished
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlSummary {
    /// Fetch attempts made, retries included
    pub fetched: u64,

    /// URLs fetched and extracted successfully
    pub succeeded: u64,

    /// URLs given up on, with their reasons persisted
    pub permanently_failed: u64,

    /// URLs still queued (or delayed) when the crawl stopped
    pub pending_at_shutdown: u64,

    /// Records handed to the sink
    pub records: u64,

    /// Retries scheduled after transient failures
    pub retries: u64,

    /// Wall-clock time of the crawl
    pub duration: Duration,

    /// True if the queue drained without cancellation or system failure
    pub completed: bool,
}

impl CrawlSummary {
    /// Builds a summary from the worker pool's counters
    pub fn from_counts(counts: DispatchCounts, pending_at_shutdown: usize, duration: Duration) -> Self {
        Self {
            fetched: counts.fetched,
            succeeded: counts.succeeded,
            permanently_failed: counts.permanently_failed,
            pending_at_shutdown: pending_at_shutdown as u64,
            records: counts.records,
            retries: counts.retried,
            duration,
            completed: false,
        }
    }

    pub fn mark_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Share of fetched URLs that ended in success, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.permanently_failed;
        if finished == 0 {
            0.0
        } else {
            (self.succeeded as f64 / finished as f64) * 100.0
        }
    }
}

/// Prints the summary to stdout
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    if summary.completed {
        println!("Status: completed");
    } else {
        println!("Status: stopped early (resume by running again)");
    }
    println!("Duration: {:.1}s", summary.duration.as_secs_f64());
    println!();

    println!("URLs:");
    println!("  Fetched: {}", summary.fetched);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Permanently failed: {}", summary.permanently_failed);
    println!("  Pending at shutdown: {}", summary.pending_at_shutdown);
    println!();

    println!("Records written: {}", summary.records);
    println!("Retries scheduled: {}", summary.retries);
    println!(
        "Success Rate: {:.1}% ({} / {} URLs)",
        summary.success_rate(),
        summary.succeeded,
        summary.succeeded + summary.permanently_failed
    );
}
