#![forbid(unsafe_code)]

use mip_core::JobError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("duplicate id: {id}")]
    DuplicateId { id: String },
    #[error("unknown id")]
    UnknownId,
    #[error("job store is full (max_jobs={max_jobs}, none terminal)")]
    CapacityExceeded { max_jobs: usize },
    #[error("revision mismatch (expected={expected}, actual={actual})")]
    RevisionMismatch { expected: i64, actual: i64 },
    #[error(transparent)]
    Rejected(#[from] JobError),
    #[error("job store lock poisoned")]
    Poisoned,
}
