//! Storage module for persisting crawl output
//!
//! This module handles everything the crawl writes durably, including:
//! - Extracted records and permanent failures
//! - Checkpoints of crawl progress for resumption
//! - Run tracking (SQLite backend)
//!
//! Two backends implement [`ResultSink`]: [`SqliteSink`] and [`JsonlSink`].

mod jsonl;
mod schema;
mod sqlite;
mod traits;

pub use jsonl::JsonlSink;
pub use sqlite::SqliteSink;
pub use traits::{ResultSink, StorageError, StorageResult};

use crate::config::{OutputConfig, SinkBackend};
use std::sync::Arc;

/// Opens the sink selected by the output configuration
///
/// # Arguments
///
/// * `config` - The output section of the configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn ResultSink>)` - The opened sink, ready to be shared by workers
/// * `Err(StorageError)` - The database or files could not be opened
pub fn open_sink(config: &OutputConfig) -> StorageResult<Arc<dyn ResultSink>> {
    let sink: Arc<dyn ResultSink> = match config.backend {
        SinkBackend::Sqlite => Arc::new(SqliteSink::new(&config.database_path)?),
        SinkBackend::Jsonl => Arc::new(JsonlSink::new(
            &config.records_path,
            &config.failures_path,
            &config.checkpoint_path,
        )?),
    };
    Ok(sink)
}

/// Represents a crawl run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a run in this status left work behind that can be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }
}

/// Totals reported by a sink
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkStats {
    /// Records persisted
    pub records: u64,
    /// Permanent failures persisted
    pub failures: u64,
    /// Most common failure reasons, most frequent first
    pub failure_reasons: Vec<(String, u64)>,
    /// URLs recorded as visited in the stored checkpoint
    pub checkpoint_visited: u64,
    /// Tasks still pending in the stored checkpoint
    pub checkpoint_pending: u64,
    /// Most recent run, for backends that track runs
    pub latest_run: Option<RunRecord>,
}

/// Number of failure reasons reported in [`SinkStats::failure_reasons`]
pub const TOP_FAILURE_REASONS: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(RunStatus::Running.is_resumable());
        assert!(RunStatus::Interrupted.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
        assert!(!RunStatus::Failed.is_resumable());
    }

    #[test]
    fn test_open_sink_per_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OutputConfig {
            backend: SinkBackend::Jsonl,
            database_path: dir.path().join("harvest.db"),
            records_path: dir.path().join("records.jsonl"),
            failures_path: dir.path().join("failures.jsonl"),
            checkpoint_path: dir.path().join("checkpoint.jsonl"),
        };

        let sink = open_sink(&config).unwrap();
        assert_eq!(sink.stats().unwrap().records, 0);
        assert!(!PathBuf::from(&config.database_path).exists());

        config.backend = SinkBackend::Sqlite;
        let sink = open_sink(&config).unwrap();
        assert_eq!(sink.stats().unwrap().records, 0);
        assert!(config.database_path.exists());
    }
}
