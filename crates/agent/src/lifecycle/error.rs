#![forbid(unsafe_code)]

use mip_core::{JobError, JobStatus};
use mip_storage::StoreError;

/// Refusal of a lifecycle operation. Every message names the precondition that failed and is safe
/// to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),
    #[error("Job not found")]
    NotFound { job_id: String },
    #[error("status_id does not match job {job_id}")]
    Unauthorized { job_id: String },
    #[error("job {job_id} is {from}, cannot move to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("agent is at capacity ({max_jobs} unfinished jobs)")]
    CapacityExceeded { max_jobs: usize },
    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable lower_snake name, used as a log field and in tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Internal(_) => "internal",
        }
    }

    /// Converts a store failure for `job_id`. Backend details stay in the log.
    pub(crate) fn from_store(err: StoreError, job_id: &str) -> Self {
        match err {
            StoreError::UnknownId => Self::NotFound {
                job_id: job_id.to_string(),
            },
            StoreError::Rejected(rejected) => rejected.into(),
            StoreError::CapacityExceeded { max_jobs } => Self::CapacityExceeded { max_jobs },
            other => {
                tracing::error!(job_id, error = %other, "job store failure");
                Self::Internal("job store unavailable".to_string())
            }
        }
    }
}

impl From<JobError> for LifecycleError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidTransition { job_id, from, to } => {
                Self::InvalidTransition { job_id, from, to }
            }
            JobError::Unauthorized { job_id } => Self::Unauthorized { job_id },
        }
    }
}
