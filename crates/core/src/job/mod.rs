#![forbid(unsafe_code)]

mod error;
mod record;
mod status;


pub use error::JobError;
pub use record::{ExtraInput, JobRecord, NewJob};
pub use status::JobStatus;
