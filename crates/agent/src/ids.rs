#![forbid(unsafe_code)]

use mip_core::{IdError, JobId, StatusId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifiers handed out for one new job.
#[derive(Clone, Debug)]
pub struct IssuedIds {
    pub job_id: JobId,
    pub status_id: StatusId,
    pub blockchain_identifier: String,
}

pub trait IdGenerator: Send + Sync {
    fn issue(&self) -> Result<IssuedIds, IdError>;
}

/// Random v4 UUIDs. `blockchain_identifier` is a placeholder until settlement exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn issue(&self) -> Result<IssuedIds, IdError> {
        Ok(IssuedIds {
            job_id: JobId::try_new(format!("job_{}", uuid::Uuid::new_v4().simple()))?,
            status_id: StatusId::try_new(uuid::Uuid::new_v4().to_string())?,
            blockchain_identifier: format!("block_{}", uuid::Uuid::new_v4().simple()),
        })
    }
}

/// Predictable ids for tests and fixtures.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn issue(&self) -> Result<IssuedIds, IdError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedIds {
            job_id: JobId::try_new(format!("job_{n:06}"))?,
            status_id: StatusId::try_new(format!("status-{n:06}"))?,
            blockchain_identifier: format!("block_{n:06}"),
        })
    }
}
