#![forbid(unsafe_code)]

use super::{JobStore, Mutator, StoreError};
use mip_core::{JobId, JobRecord, JobStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-local store. One lock guards the whole map; it is held only for a clone and the
/// mutator call, never across I/O.
#[derive(Debug)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
    max_jobs: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, JobRecord>,
    status_ids: HashSet<String>,
    // Creation order, oldest first; drives eviction and listing.
    order: VecDeque<JobId>,
}

impl MemoryJobStore {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            max_jobs: max_jobs.max(1),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_JOBS)
    }
}

impl MemoryState {
    fn evict_oldest_terminal(&mut self) -> Option<JobId> {
        let index = self.order.iter().position(|id| {
            self.jobs
                .get(id)
                .is_some_and(|job| job.status.is_terminal())
        })?;
        let job_id = self.order.remove(index)?;
        if let Some(job) = self.jobs.remove(&job_id) {
            self.status_ids.remove(job.status_id.as_str());
        }
        Some(job_id)
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.jobs.contains_key(&record.job_id) {
            return Err(StoreError::DuplicateId {
                id: record.job_id.into_string(),
            });
        }
        if state.status_ids.contains(record.status_id.as_str()) {
            return Err(StoreError::DuplicateId {
                id: "status_id".to_string(),
            });
        }
        if state.jobs.len() >= self.max_jobs {
            let Some(evicted) = state.evict_oldest_terminal() else {
                return Err(StoreError::CapacityExceeded {
                    max_jobs: self.max_jobs,
                });
            };
            tracing::debug!(job_id = %evicted, "evicted terminal job");
        }

        state
            .status_ids
            .insert(record.status_id.as_str().to_string());
        state.order.push_back(record.job_id.clone());
        state.jobs.insert(record.job_id.clone(), record);
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.read()?.jobs.get(job_id).cloned())
    }

    fn update(&self, job_id: &JobId, mutator: Mutator<'_>) -> Result<JobRecord, StoreError> {
        let mut state = self.write()?;
        let Some(current) = state.jobs.get_mut(job_id) else {
            return Err(StoreError::UnknownId);
        };
        let mut next = current.clone();
        mutator(&mut next)?;
        if next.job_id != current.job_id || next.status_id != current.status_id {
            return Err(StoreError::InvalidInput("job identity is immutable"));
        }
        *current = next.clone();
        Ok(next)
    }

    fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| statuses.contains(&job.status))
            .take(limit)
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.jobs.len())
    }
}
