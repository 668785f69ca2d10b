#![forbid(unsafe_code)]

use super::super::StoreError;
use mip_core::{JobId, JobRecord, JobStatus, StatusId};
use rusqlite::{Connection, OptionalExtension, params};

const COLUMNS: &str = "seq, job_id, status_id, status, purchaser_identifier, submitted_payload, \
     input_hash, blockchain_identifier, extra_input_json, extra_input_hash, extra_input_signature, \
     result_json, error, pay_by_ms, submit_result_by_ms, unlock_ms, external_dispute_unlock_ms, \
     created_at_ms, updated_at_ms, revision";

struct RawJobRow {
    seq: i64,
    job_id: String,
    status_id: String,
    status: String,
    purchaser_identifier: String,
    submitted_payload: Vec<u8>,
    input_hash: String,
    blockchain_identifier: String,
    extra_input_json: Option<String>,
    extra_input_hash: Option<String>,
    extra_input_signature: Option<String>,
    result_json: Option<String>,
    error: Option<String>,
    pay_by_ms: i64,
    submit_result_by_ms: i64,
    unlock_ms: i64,
    external_dispute_unlock_ms: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
    revision: i64,
}

fn read_raw(row: &rusqlite::Row<'_>) -> Result<RawJobRow, rusqlite::Error> {
    Ok(RawJobRow {
        seq: row.get(0)?,
        job_id: row.get(1)?,
        status_id: row.get(2)?,
        status: row.get(3)?,
        purchaser_identifier: row.get(4)?,
        submitted_payload: row.get(5)?,
        input_hash: row.get(6)?,
        blockchain_identifier: row.get(7)?,
        extra_input_json: row.get(8)?,
        extra_input_hash: row.get(9)?,
        extra_input_signature: row.get(10)?,
        result_json: row.get(11)?,
        error: row.get(12)?,
        pay_by_ms: row.get(13)?,
        submit_result_by_ms: row.get(14)?,
        unlock_ms: row.get(15)?,
        external_dispute_unlock_ms: row.get(16)?,
        created_at_ms: row.get(17)?,
        updated_at_ms: row.get(18)?,
        revision: row.get(19)?,
    })
}

impl RawJobRow {
    fn into_record(self) -> Result<(i64, JobRecord), StoreError> {
        let status = JobStatus::parse(&self.status)
            .ok_or(StoreError::InvalidInput("stored job has an unknown status"))?;
        let job_id = JobId::try_new(self.job_id)
            .map_err(|_| StoreError::InvalidInput("stored job has an invalid job_id"))?;
        let status_id = StatusId::try_new(self.status_id)
            .map_err(|_| StoreError::InvalidInput("stored job has an invalid status_id"))?;
        Ok((
            self.seq,
            JobRecord {
                job_id,
                status_id,
                status,
                purchaser_identifier: self.purchaser_identifier,
                submitted_payload: self.submitted_payload,
                input_hash: self.input_hash,
                blockchain_identifier: self.blockchain_identifier,
                extra_input_json: self.extra_input_json,
                extra_input_hash: self.extra_input_hash,
                extra_input_signature: self.extra_input_signature,
                result_json: self.result_json,
                error: self.error,
                pay_by_ms: self.pay_by_ms,
                submit_result_by_ms: self.submit_result_by_ms,
                unlock_ms: self.unlock_ms,
                external_dispute_unlock_ms: self.external_dispute_unlock_ms,
                created_at_ms: self.created_at_ms,
                updated_at_ms: self.updated_at_ms,
                revision: self.revision,
            },
        ))
    }
}

pub(super) fn select_one(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM jobs WHERE job_id=?1"),
            params![job_id],
            read_raw,
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(raw.into_record()?.1)),
        None => Ok(None),
    }
}

pub(super) fn select_by_status(
    conn: &Connection,
    status: JobStatus,
    limit: usize,
) -> Result<Vec<(i64, JobRecord)>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE status=?1 ORDER BY seq ASC LIMIT ?2"
    ))?;
    let mut rows = stmt.query(params![status.as_str(), limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read_raw(row)?.into_record()?);
    }
    Ok(out)
}

pub(super) fn insert(conn: &Connection, job: &JobRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO jobs(
          job_id, status_id, status, purchaser_identifier, submitted_payload, input_hash,
          blockchain_identifier, extra_input_json, extra_input_hash, extra_input_signature,
          result_json, error, pay_by_ms, submit_result_by_ms, unlock_ms,
          external_dispute_unlock_ms, created_at_ms, updated_at_ms, revision
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
        params![
            job.job_id.as_str(),
            job.status_id.as_str(),
            job.status.as_str(),
            job.purchaser_identifier,
            job.submitted_payload,
            job.input_hash,
            job.blockchain_identifier,
            job.extra_input_json,
            job.extra_input_hash,
            job.extra_input_signature,
            job.result_json,
            job.error,
            job.pay_by_ms,
            job.submit_result_by_ms,
            job.unlock_ms,
            job.external_dispute_unlock_ms,
            job.created_at_ms,
            job.updated_at_ms,
            job.revision,
        ],
    )?;
    Ok(())
}

/// Writes the mutable columns. Returns the number of rows changed: zero means the stored
/// revision moved on since `expected_revision` was read.
pub(super) fn update(
    conn: &Connection,
    job: &JobRecord,
    expected_revision: i64,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        r#"
        UPDATE jobs
        SET status=?2, extra_input_json=?3, extra_input_hash=?4, extra_input_signature=?5,
            result_json=?6, error=?7, updated_at_ms=?8, revision=?9
        WHERE job_id=?1 AND revision=?10
        "#,
        params![
            job.job_id.as_str(),
            job.status.as_str(),
            job.extra_input_json,
            job.extra_input_hash,
            job.extra_input_signature,
            job.result_json,
            job.error,
            job.updated_at_ms,
            job.revision,
            expected_revision,
        ],
    )
}
