#![forbid(unsafe_code)]

mod rows;
mod schema;

use super::{JobStore, Mutator, StoreError};
use mip_core::{JobId, JobRecord, JobStatus};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const DB_FILE_NAME: &str = "mip_agent.db";

/// Durable store. The connection sits behind a mutex; every write is an IMMEDIATE transaction
/// guarded by the record revision, so a second process sharing the file cannot interleave a
/// half-applied update.
#[derive(Debug)]
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    max_jobs: usize,
}

impl SqliteJobStore {
    pub fn open(storage_dir: impl AsRef<Path>, max_jobs: usize) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE_NAME))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, max_jobs)
    }

    pub fn open_in_memory(max_jobs: usize) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, max_jobs)
    }

    fn from_connection(conn: Connection, max_jobs: usize) -> Result<Self, StoreError> {
        schema::preflight_gate(&conn)?;
        schema::install_schema(&conn, now_ms())?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_jobs: max_jobs.max(1),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let live: i64 = tx.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        if usize::try_from(live).unwrap_or(usize::MAX) >= self.max_jobs {
            let oldest_terminal: Option<(i64, String)> = tx
                .query_row(
                    "SELECT seq, job_id FROM jobs WHERE status IN ('completed', 'failed') ORDER BY seq ASC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((seq, evicted)) = oldest_terminal else {
                return Err(StoreError::CapacityExceeded {
                    max_jobs: self.max_jobs,
                });
            };
            tx.execute("DELETE FROM jobs WHERE seq=?1", params![seq])?;
            tracing::debug!(job_id = %evicted, "evicted terminal job");
        }

        if let Err(err) = rows::insert(&tx, &record) {
            return Err(map_insert_conflict(err, &record));
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.lock()?;
        rows::select_one(&conn, job_id.as_str())
    }

    fn update(&self, job_id: &JobId, mutator: Mutator<'_>) -> Result<JobRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(current) = rows::select_one(&tx, job_id.as_str())? else {
            return Err(StoreError::UnknownId);
        };
        let mut next = current.clone();
        mutator(&mut next)?;
        if next.job_id != current.job_id || next.status_id != current.status_id {
            return Err(StoreError::InvalidInput("job identity is immutable"));
        }

        let changed = rows::update(&tx, &next, current.revision)?;
        if changed == 0 {
            let actual: i64 = tx.query_row(
                "SELECT revision FROM jobs WHERE job_id=?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )?;
            return Err(StoreError::RevisionMismatch {
                expected: current.revision,
                actual,
            });
        }
        tx.commit()?;
        Ok(next)
    }

    fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.lock()?;
        let mut out = Vec::new();
        for status in statuses {
            out.extend(rows::select_by_status(&conn, *status, limit)?);
        }
        out.sort_by_key(|(seq, _)| *seq);
        Ok(out.into_iter().take(limit).map(|(_, job)| job).collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn map_insert_conflict(err: rusqlite::Error, record: &JobRecord) -> StoreError {
    if !is_constraint_violation(&err) {
        return StoreError::Sql(err);
    }
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.as_str(),
        _ => "",
    };
    let id = if message.contains("jobs.status_id") {
        "status_id".to_string()
    } else {
        record.job_id.as_str().to_string()
    };
    StoreError::DuplicateId { id }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
