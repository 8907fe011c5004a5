//! Storage traits and error types
//!
//! This module defines the trait interface for result sinks and the
//! associated error types.

use crate::state::{CrawlState, Record};
use crate::storage::{RunStatus, SinkStats};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt checkpoint at line {line}: {reason}")]
    CorruptCheckpoint { line: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable destination for crawl output and progress
///
/// Sinks are shared by all workers, so every method takes `&self` and the
/// implementation serializes writes internally. Each call either persists
/// completely or returns an error; a partially written record or checkpoint
/// is never observable.
pub trait ResultSink: Send + Sync {
    /// Persists one extracted record
    fn record(&self, record: &Record) -> StorageResult<()>;

    /// Persists a URL that failed permanently, with the reason
    fn record_failure(&self, url: &str, reason: &str) -> StorageResult<()>;

    /// Replaces the stored checkpoint with `state`
    fn checkpoint(&self, state: &CrawlState) -> StorageResult<()>;

    /// Loads the last checkpoint, or an empty state if none exists
    fn load_checkpoint(&self) -> StorageResult<CrawlState>;

    /// Drops the stored checkpoint so the next crawl starts from the seeds
    fn clear_checkpoint(&self) -> StorageResult<()>;

    /// Retires the checkpoint of a crawl that ran to completion
    fn finish(&self) -> StorageResult<()>;

    /// Counts of what has been persisted so far
    fn stats(&self) -> StorageResult<SinkStats>;

    // ===== Run Management =====

    /// Starts (or resumes) a tracked run for the given configuration hash
    ///
    /// Backends without run tracking accept and ignore this.
    fn begin_run(&self, _config_hash: &str, _resume: bool) -> StorageResult<()> {
        Ok(())
    }

    /// Records how the current run ended
    fn end_run(&self, _status: RunStatus) -> StorageResult<()> {
        Ok(())
    }
}
