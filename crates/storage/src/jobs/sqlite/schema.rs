#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

pub(super) const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: [&str; 2] = ["store_state", "jobs"];

pub(super) const SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_state (
  singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
  schema_version INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL UNIQUE,
  status_id TEXT NOT NULL UNIQUE,
  status TEXT NOT NULL,
  purchaser_identifier TEXT NOT NULL,
  submitted_payload BLOB NOT NULL,
  input_hash TEXT NOT NULL,
  blockchain_identifier TEXT NOT NULL,
  extra_input_json TEXT,
  extra_input_hash TEXT,
  extra_input_signature TEXT,
  result_json TEXT,
  error TEXT,
  pay_by_ms INTEGER NOT NULL,
  submit_result_by_ms INTEGER NOT NULL,
  unlock_ms INTEGER NOT NULL,
  external_dispute_unlock_ms INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL,
  revision INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS jobs_status_seq ON jobs(status, seq);
"#;

/// Refuses to open a database written by something else, or by an incompatible version.
pub(super) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }
    if tables
        .iter()
        .any(|table| !REQUIRED_TABLES.contains(&table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }
    if REQUIRED_TABLES.iter().any(|table| !tables.contains(*table)) {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: required table is missing",
        ));
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    match version {
        Some(SCHEMA_VERSION) => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

pub(super) fn install_schema(conn: &Connection, now_ms: i64) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO store_state(singleton, schema_version, created_at_ms) VALUES (1, ?1, ?2)",
        params![SCHEMA_VERSION, now_ms],
    )?;
    Ok(())
}
