#![forbid(unsafe_code)]

use super::JobStatus;

/// A precondition on a job record that a requested change did not satisfy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobError {
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    Unauthorized {
        job_id: String,
    },
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { job_id, from, to } => write!(
                f,
                "job {job_id} cannot move from {from} to {to}"
            ),
            Self::Unauthorized { job_id } => {
                write!(f, "status_id does not match job {job_id}")
            }
        }
    }
}

impl std::error::Error for JobError {}
