//! Output module for crawl summaries and statistics
//!
//! This module handles:
//! - The summary printed when a crawl stops
//! - Statistics about what a sink has persisted (`--stats`)

pub mod stats;
mod summary;

pub use stats::{load_statistics, print_statistics};
pub use summary::{print_summary, CrawlSummary};
