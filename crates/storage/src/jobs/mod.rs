#![forbid(unsafe_code)]

mod error;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use mip_core::{JobError, JobId, JobRecord, JobStatus};

/// Change applied to a private copy of a record. The copy replaces the stored record only when
/// the mutator returns `Ok`.
pub type Mutator<'a> = &'a mut dyn FnMut(&mut JobRecord) -> Result<(), JobError>;

/// Keyed job records with whole-record atomic updates.
///
/// Reads return owned snapshots. Updates for one job are totally ordered; a rejected mutation is
/// never observable.
pub trait JobStore: Send + Sync {
    fn create(&self, record: JobRecord) -> Result<(), StoreError>;

    fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    fn update(&self, job_id: &JobId, mutator: Mutator<'_>) -> Result<JobRecord, StoreError>;

    /// Oldest first.
    fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
