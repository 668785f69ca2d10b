#![forbid(unsafe_code)]

pub mod ids;
pub mod job;

pub use ids::{IdError, JobId, StatusId};
pub use job::{ExtraInput, JobError, JobRecord, JobStatus, NewJob};
