//! SQLite schema and query text for the scan store.

/// Results table. Rows are pre-created incomplete and only ever updated.
pub const CREATE_SCAN_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_results (
    id              INTEGER PRIMARY KEY,
    target          TEXT    NOT NULL UNIQUE,
    artifact        BLOB,
    success         INTEGER,
    error           TEXT,
    worker_id       INTEGER,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    processing_ms   INTEGER NOT NULL DEFAULT 0,
    complete        INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT
)
"#;

/// Run options as key/value pairs.
pub const CREATE_SCAN_OPTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_options (
    key             TEXT PRIMARY KEY,
    value           TEXT NOT NULL,
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub const CREATE_INDEXES: &[&str] =
    &["CREATE INDEX IF NOT EXISTS idx_scan_results_complete ON scan_results(complete)"];

pub const INSERT_PENDING: &str = "INSERT OR IGNORE INTO scan_results (target) VALUES (?1)";

pub const UPDATE_RESULT: &str = r#"
UPDATE scan_results SET
    artifact = ?1,
    success = ?2,
    error = ?3,
    worker_id = ?4,
    retry_count = ?5,
    processing_ms = ?6,
    complete = 1,
    updated_at = ?7
WHERE target = ?8
"#;

pub const SELECT_INCOMPLETE: &str =
    "SELECT target FROM scan_results WHERE complete = 0 ORDER BY id";

pub const SELECT_COMPLETE: &str = "SELECT * FROM scan_results WHERE complete = 1 ORDER BY id";

pub const SELECT_BY_TARGET: &str = "SELECT * FROM scan_results WHERE target = ?1";

pub const SELECT_COUNTS: &str = r#"
SELECT
    COUNT(*) AS total,
    COALESCE(SUM(complete), 0) AS complete,
    COALESCE(SUM(CASE WHEN complete = 1 AND success = 1 THEN 1 ELSE 0 END), 0) AS succeeded,
    COALESCE(SUM(CASE WHEN complete = 1 AND success = 0 THEN 1 ELSE 0 END), 0) AS failed
FROM scan_results
"#;

pub const UPSERT_OPTION: &str = r#"
INSERT INTO scan_options (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

pub const SELECT_OPTION: &str = "SELECT value FROM scan_options WHERE key = ?1";

/// Folds the write-ahead log back into the main database file.
pub const CHECKPOINT_TRUNCATE: &str = "PRAGMA wal_checkpoint(TRUNCATE)";

/// Statements run by [`ScanStore::initialize`](super::ScanStore::initialize), in order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![CREATE_SCAN_RESULTS_TABLE, CREATE_SCAN_OPTIONS_TABLE];
    statements.extend_from_slice(CREATE_INDEXES);
    statements
}
