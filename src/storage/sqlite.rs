//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ResultSink trait.

use crate::state::{CrawlState, FailureEntry, Record, UrlTask};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, SinkStats, TOP_FAILURE_REASONS};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

struct SinkInner {
    conn: Connection,
    run_id: Option<i64>,
}

/// SQLite result sink
pub struct SqliteSink {
    inner: Mutex<SinkInner>,
}

impl SqliteSink {
    /// Creates a new SqliteSink instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(SinkInner { conn, run_id: None }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ID of the run this sink is writing for, if one was started
    pub fn current_run(&self) -> Option<i64> {
        self.lock().run_id
    }

    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    pub fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let mut inner = self.lock();
        let now = Utc::now().to_rfc3339();
        inner.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        let run_id = inner.conn.last_insert_rowid();
        inner.run_id = Some(run_id);
        Ok(run_id)
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let inner = self.lock();
        inner
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent run
    pub fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let inner = self.lock();
        latest_run(&inner.conn)
    }

    /// Updates the status of a run
    pub fn update_run_status(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let inner = self.lock();
        let now = Utc::now().to_rfc3339();
        let changed = inner.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Marks a run as completed with a finish timestamp
    pub fn complete_run(&self, run_id: i64) -> StorageResult<()> {
        self.update_run_status(run_id, RunStatus::Completed)
    }

    // ===== Queries =====

    #[cfg(test)]
    pub fn count_records(&self) -> StorageResult<u64> {
        let inner = self.lock();
        count(&inner.conn, "SELECT COUNT(*) FROM records")
    }

    /// Loads every stored record in insertion order
    pub fn load_records(&self) -> StorageResult<Vec<Record>> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT source_url, fields, extracted_links, extracted_at FROM records ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (source_url, fields, links, extracted_at) in rows {
            let value = json!({
                "source_url": source_url,
                "fields": serde_json::from_str::<serde_json::Value>(&fields)?,
                "extracted_links": serde_json::from_str::<serde_json::Value>(&links)?,
                "extracted_at": extracted_at,
            });
            records.push(serde_json::from_value(value)?);
        }
        Ok(records)
    }

    /// Loads every permanent failure, ordered by URL
    pub fn load_failures(&self) -> StorageResult<Vec<FailureEntry>> {
        let inner = self.lock();
        let mut stmt = inner
            .conn
            .prepare("SELECT url, reason FROM failures ORDER BY url")?;
        let failures = stmt
            .query_map([], |row| {
                Ok(FailureEntry {
                    url: row.get(0)?,
                    reason: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Failed),
    })
}

fn latest_run(conn: &Connection) -> StorageResult<Option<RunRecord>> {
    let run = conn
        .query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
            [],
            run_from_row,
        )
        .optional()?;
    Ok(run)
}

fn count(conn: &Connection, sql: &str) -> StorageResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

fn clear_checkpoint_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        DELETE FROM checkpoint_meta;
        DELETE FROM checkpoint_visited;
        DELETE FROM checkpoint_pending;
        DELETE FROM checkpoint_failures;
    ",
    )
}

impl ResultSink for SqliteSink {
    fn record(&self, record: &Record) -> StorageResult<()> {
        let fields = serde_json::to_string(record.fields())?;
        let links = serde_json::to_string(record.extracted_links())?;

        let inner = self.lock();
        inner.conn.execute(
            "INSERT INTO records (run_id, source_url, fields, extracted_links, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                inner.run_id,
                record.source_url(),
                fields,
                links,
                record.extracted_at().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn record_failure(&self, url: &str, reason: &str) -> StorageResult<()> {
        let inner = self.lock();
        inner.conn.execute(
            "INSERT OR REPLACE INTO failures (url, run_id, reason, failed_at) VALUES (?1, ?2, ?3, ?4)",
            params![url, inner.run_id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn checkpoint(&self, state: &CrawlState) -> StorageResult<()> {
        let mut inner = self.lock();
        let tx = inner.conn.transaction()?;

        clear_checkpoint_tables(&tx)?;
        tx.execute(
            "INSERT INTO checkpoint_meta (id, written_at) VALUES (1, ?1)",
            params![Utc::now().to_rfc3339()],
        )?;

        {
            let mut visited =
                tx.prepare("INSERT INTO checkpoint_visited (position, url) VALUES (?1, ?2)")?;
            for (position, url) in state.visited.iter().enumerate() {
                visited.execute(params![position as i64, url])?;
            }

            let mut pending = tx.prepare(
                "INSERT INTO checkpoint_pending (position, url, depth, discovered_from, attempt)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, task) in state.pending.iter().enumerate() {
                pending.execute(params![
                    position as i64,
                    task.url.as_str(),
                    task.depth,
                    task.discovered_from,
                    task.attempt,
                ])?;
            }

            let mut failures = tx.prepare(
                "INSERT INTO checkpoint_failures (position, url, reason) VALUES (?1, ?2, ?3)",
            )?;
            for (position, failure) in state.permanent_failures.iter().enumerate() {
                failures.execute(params![position as i64, failure.url, failure.reason])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "Checkpoint written: {} visited, {} pending, {} failed",
            state.visited.len(),
            state.pending.len(),
            state.permanent_failures.len()
        );
        Ok(())
    }

    fn load_checkpoint(&self) -> StorageResult<CrawlState> {
        let inner = self.lock();
        let conn = &inner.conn;

        let exists: Option<String> = conn
            .query_row("SELECT written_at FROM checkpoint_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(written_at) = exists else {
            return Ok(CrawlState::new());
        };
        tracing::debug!("Loading checkpoint written at {}", written_at);

        let visited = conn
            .prepare("SELECT url FROM checkpoint_visited ORDER BY position")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let rows = conn
            .prepare(
                "SELECT url, depth, discovered_from, attempt FROM checkpoint_pending ORDER BY position",
            )?
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut pending = Vec::with_capacity(rows.len());
        for (index, (url, depth, discovered_from, attempt)) in rows.into_iter().enumerate() {
            let url = Url::parse(&url).map_err(|e| StorageError::CorruptCheckpoint {
                line: index + 1,
                reason: format!("invalid pending URL {}: {}", url, e),
            })?;
            pending.push(UrlTask {
                url,
                depth,
                discovered_from,
                attempt,
            });
        }

        let permanent_failures = conn
            .prepare("SELECT url, reason FROM checkpoint_failures ORDER BY position")?
            .query_map([], |row| {
                Ok(FailureEntry {
                    url: row.get(0)?,
                    reason: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CrawlState {
            visited,
            pending,
            permanent_failures,
        })
    }

    fn clear_checkpoint(&self) -> StorageResult<()> {
        let mut inner = self.lock();
        let tx = inner.conn.transaction()?;
        clear_checkpoint_tables(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn finish(&self) -> StorageResult<()> {
        self.clear_checkpoint()?;
        if let Some(run_id) = self.current_run() {
            self.complete_run(run_id)?;
        }
        Ok(())
    }

    fn stats(&self) -> StorageResult<SinkStats> {
        let inner = self.lock();
        let conn = &inner.conn;

        let failure_reasons = conn
            .prepare(
                "SELECT reason, COUNT(*) AS n FROM failures GROUP BY reason ORDER BY n DESC, reason LIMIT ?1",
            )?
            .query_map(params![TOP_FAILURE_REASONS as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SinkStats {
            records: count(conn, "SELECT COUNT(*) FROM records")?,
            failures: count(conn, "SELECT COUNT(*) FROM failures")?,
            failure_reasons,
            checkpoint_visited: count(conn, "SELECT COUNT(*) FROM checkpoint_visited")?,
            checkpoint_pending: count(conn, "SELECT COUNT(*) FROM checkpoint_pending")?,
            latest_run: latest_run(conn)?,
        })
    }

    fn begin_run(&self, config_hash: &str, resume: bool) -> StorageResult<()> {
        let previous = self.get_latest_run()?;

        match previous {
            Some(run) if resume && run.status.is_resumable() => {
                if run.config_hash != config_hash {
                    tracing::warn!(
                        "Configuration changed since run {} started; resuming with the new configuration",
                        run.id
                    );
                }
                let mut inner = self.lock();
                inner.conn.execute(
                    "UPDATE runs SET status = ?1, config_hash = ?2, finished_at = NULL WHERE id = ?3",
                    params![RunStatus::Running.to_db_string(), config_hash, run.id],
                )?;
                inner.run_id = Some(run.id);
                tracing::info!("Resuming run {}", run.id);
            }
            _ => {
                let run_id = self.create_run(config_hash)?;
                tracing::info!("Started run {}", run_id);
            }
        }
        Ok(())
    }

    fn end_run(&self, status: RunStatus) -> StorageResult<()> {
        match self.current_run() {
            Some(run_id) => self.update_run_status(run_id, status),
            None => Ok(()),
        }
    }
}
