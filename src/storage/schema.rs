//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Ripple-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Extracted records; fields and links are JSON text
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER REFERENCES runs(id),
    source_url TEXT NOT NULL,
    fields TEXT NOT NULL,
    extracted_links TEXT NOT NULL,
    extracted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_url);

-- URLs that failed permanently
CREATE TABLE IF NOT EXISTS failures (
    url TEXT PRIMARY KEY,
    run_id INTEGER REFERENCES runs(id),
    reason TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

-- Latest checkpoint, replaced as a whole in one transaction
CREATE TABLE IF NOT EXISTS checkpoint_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    written_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_visited (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_pending (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    discovered_from TEXT,
    attempt INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS checkpoint_failures (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    reason TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
