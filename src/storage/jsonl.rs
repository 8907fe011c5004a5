//! Line-delimited JSON storage implementation
//!
//! Records and failures are appended to their own files, one complete JSON
//! object per line, and synced before the call returns. The checkpoint is a
//! separate line-delimited file:
//!
//! ```text
//! {"type":"header","version":1,"written_at":"2024-05-01T12:00:00Z"}
//! {"type":"visited","url":"https://a.test/"}
//! {"type":"pending","task":{"url":"https://a.test/x","depth":1,"discovered_from":"https://a.test/","attempt":0}}
//! {"type":"failure","url":"https://a.test/gone","reason":"HTTP 404"}
//! ```
//!
//! It is always written to a temporary file in the same directory and renamed
//! over the previous checkpoint, so readers see either the old or the new one.

use crate::state::{CrawlState, FailureEntry, Record, UrlTask};
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::storage::{SinkStats, TOP_FAILURE_REASONS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CheckpointLine {
    Header {
        version: u32,
        written_at: DateTime<Utc>,
    },
    Visited {
        url: String,
    },
    Pending {
        task: UrlTask,
    },
    Failure {
        url: String,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct FailureLine {
    url: String,
    reason: String,
    failed_at: DateTime<Utc>,
}

/// Result sink writing line-delimited JSON files
pub struct JsonlSink {
    records_path: PathBuf,
    failures_path: PathBuf,
    checkpoint_path: PathBuf,
    records: Mutex<File>,
    failures: Mutex<File>,
    checkpoint_lock: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    truncate_torn_tail(&mut file, path)?;
    Ok(file)
}

/// Drops a trailing partial line left by an append that never finished
fn truncate_torn_tail(file: &mut File, path: &Path) -> io::Result<()> {
    let len = file.metadata()?.len();
    let mut buf = [0u8; 4096];
    let mut end = len;
    let mut keep = 0;

    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    if keep < len {
        tracing::warn!(
            "Discarding {} bytes of incomplete line at the end of {}",
            len - keep,
            path.display()
        );
        file.set_len(keep)?;
    }
    Ok(())
}

/// Opens a file for reading, treating a missing file as absent
fn open_existing(path: &Path) -> io::Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// An append-only file that can be cut back after a failed write
trait AppendLog: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendLog for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends one line and makes it durable
///
/// If any part of the write fails the file is cut back to its previous
/// length, so a later append never lands on the end of a partial line.
fn append_line<L: AppendLog>(log: &Mutex<L>, mut line: String) -> StorageResult<()> {
    line.push('\n');
    let mut log = lock(log);
    let before = log.size()?;

    let written = log
        .write_all(line.as_bytes())
        .and_then(|_| log.flush())
        .and_then(|_| log.sync());

    if let Err(e) = written {
        if let Err(undo) = log.truncate(before) {
            tracing::error!("Could not roll back partial line: {}", undo);
        }
        return Err(e.into());
    }
    Ok(())
}

/// Non-empty lines of a file, with 1-based line numbers
fn read_lines(path: &Path) -> StorageResult<Vec<(usize, String)>> {
    let Some(file) = open_existing(path)? else {
        return Ok(Vec::new());
    };
    let mut lines = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push((index + 1, line));
        }
    }
    Ok(lines)
}

impl JsonlSink {
    /// Opens (creating if needed) the record and failure files
    ///
    /// The checkpoint file is only touched by checkpoint operations.
    pub fn new(records_path: &Path, failures_path: &Path, checkpoint_path: &Path) -> StorageResult<Self> {
        let records = open_append(records_path)?;
        let failures = open_append(failures_path)?;
        ensure_parent(checkpoint_path)?;

        Ok(Self {
            records_path: records_path.to_path_buf(),
            failures_path: failures_path.to_path_buf(),
            checkpoint_path: checkpoint_path.to_path_buf(),
            records: Mutex::new(records),
            failures: Mutex::new(failures),
            checkpoint_lock: Mutex::new(()),
        })
    }

    /// Where a finished crawl's checkpoint is archived
    pub fn archive_path(&self) -> PathBuf {
        let mut name = self
            .checkpoint_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".done");
        self.checkpoint_path.with_file_name(name)
    }

    /// Reads every record written so far
    pub fn load_records(&self) -> StorageResult<Vec<Record>> {
        let _guard = lock(&self.records);
        read_lines(&self.records_path)?
            .into_iter()
            .map(|(_, line)| serde_json::from_str(&line).map_err(StorageError::from))
            .collect()
    }

    /// Reads every permanent failure written so far
    pub fn load_failures(&self) -> StorageResult<Vec<FailureEntry>> {
        let _guard = lock(&self.failures);
        read_lines(&self.failures_path)?
            .into_iter()
            .map(|(_, line)| -> StorageResult<FailureEntry> {
                let failure: FailureLine = serde_json::from_str(&line)?;
                Ok(FailureEntry {
                    url: failure.url,
                    reason: failure.reason,
                })
            })
            .collect()
    }

    fn read_checkpoint(&self) -> StorageResult<CrawlState> {
        let lines = read_lines(&self.checkpoint_path)?;
        let Some(((first_no, first), rest)) = lines.split_first() else {
            if self.checkpoint_path.exists() {
                return Err(StorageError::CorruptCheckpoint {
                    line: 1,
                    reason: "missing header".to_string(),
                });
            }
            return Ok(CrawlState::new());
        };

        let corrupt = |line: usize, reason: String| StorageError::CorruptCheckpoint { line, reason };

        match serde_json::from_str::<CheckpointLine>(first) {
            Ok(CheckpointLine::Header { version, .. }) if version == CHECKPOINT_VERSION => {}
            Ok(CheckpointLine::Header { version, .. }) => {
                return Err(corrupt(*first_no, format!("unsupported version {}", version)));
            }
            Ok(_) => return Err(corrupt(*first_no, "missing header".to_string())),
            Err(e) => return Err(corrupt(*first_no, e.to_string())),
        }

        let mut state = CrawlState::new();
        for (line_no, line) in rest {
            let entry: CheckpointLine =
                serde_json::from_str(line).map_err(|e| corrupt(*line_no, e.to_string()))?;
            match entry {
                CheckpointLine::Header { .. } => {
                    return Err(corrupt(*line_no, "duplicate header".to_string()));
                }
                CheckpointLine::Visited { url } => state.visited.push(url),
                CheckpointLine::Pending { task } => state.pending.push(task),
                CheckpointLine::Failure { url, reason } => {
                    state.permanent_failures.push(FailureEntry { url, reason })
                }
            }
        }
        Ok(state)
    }
}

impl ResultSink for JsonlSink {
    fn record(&self, record: &Record) -> StorageResult<()> {
        append_line(&self.records, serde_json::to_string(record)?)
    }

    fn record_failure(&self, url: &str, reason: &str) -> StorageResult<()> {
        let line = FailureLine {
            url: url.to_string(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        append_line(&self.failures, serde_json::to_string(&line)?)
    }

    fn checkpoint(&self, state: &CrawlState) -> StorageResult<()> {
        let _guard = lock(&self.checkpoint_lock);

        let dir = match self.checkpoint_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let mut write_line = |line: &CheckpointLine| -> StorageResult<()> {
                serde_json::to_writer(&mut writer, line)?;
                writer.write_all(b"\n")?;
                Ok(())
            };

            write_line(&CheckpointLine::Header {
                version: CHECKPOINT_VERSION,
                written_at: Utc::now(),
            })?;
            for url in &state.visited {
                write_line(&CheckpointLine::Visited { url: url.clone() })?;
            }
            for task in &state.pending {
                write_line(&CheckpointLine::Pending { task: task.clone() })?;
            }
            for failure in &state.permanent_failures {
                write_line(&CheckpointLine::Failure {
                    url: failure.url.clone(),
                    reason: failure.reason.clone(),
                })?;
            }
            writer.flush()?;
        }

        tmp.as_file().sync_all()?;
        tmp.persist(&self.checkpoint_path)
            .map_err(|e| StorageError::Io(e.error))?;

        tracing::debug!(
            "Checkpoint written to {}: {} visited, {} pending, {} failed",
            self.checkpoint_path.display(),
            state.visited.len(),
            state.pending.len(),
            state.permanent_failures.len()
        );
        Ok(())
    }

    fn load_checkpoint(&self) -> StorageResult<CrawlState> {
        let _guard = lock(&self.checkpoint_lock);
        self.read_checkpoint()
    }

    fn clear_checkpoint(&self) -> StorageResult<()> {
        let _guard = lock(&self.checkpoint_lock);
        match fs::remove_file(&self.checkpoint_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&self) -> StorageResult<()> {
        let _guard = lock(&self.checkpoint_lock);
        if self.checkpoint_path.exists() {
            let archive = self.archive_path();
            fs::rename(&self.checkpoint_path, &archive)?;
            tracing::info!("Checkpoint archived to {}", archive.display());
        }
        Ok(())
    }

    fn stats(&self) -> StorageResult<SinkStats> {
        let records = {
            let _guard = lock(&self.records);
            read_lines(&self.records_path)?.len() as u64
        };

        let failures = self.load_failures()?;
        let mut by_reason: HashMap<String, u64> = HashMap::new();
        for failure in &failures {
            *by_reason.entry(failure.reason.clone()).or_insert(0) += 1;
        }
        let mut failure_reasons: Vec<(String, u64)> = by_reason.into_iter().collect();
        failure_reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        failure_reasons.truncate(TOP_FAILURE_REASONS);

        let checkpoint = self.load_checkpoint()?;

        Ok(SinkStats {
            records,
            failures: failures.len() as u64,
            failure_reasons,
            checkpoint_visited: checkpoint.visited.len() as u64,
            checkpoint_pending: checkpoint.pending.len() as u64,
            latest_run: None,
        })
    }
}
