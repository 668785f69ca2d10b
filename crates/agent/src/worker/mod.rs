#![forbid(unsafe_code)]

//! Execution of the external computation once a job is `running`.
//!
//! The controller never waits for a computation: it hands a [`Work`] item to a [`Dispatch`]
//! implementation and returns. Whoever runs the work reports back through
//! [`Completion::finish`], which moves the job to `completed` or `failed`.

mod command;
mod pool;

pub use command::{CommandComputation, UnconfiguredComputation};
pub use pool::WorkerPool;

use crate::clock::Clock;
use mip_core::JobId;
use mip_storage::JobStore;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// What the computation sees of a job.
#[derive(Clone, Debug)]
pub struct ComputationInput {
    pub job_id: JobId,
    pub payload: Vec<u8>,
    pub extra_input: Option<Value>,
}

pub trait Computation: Send + Sync {
    /// `Err` carries a failure detail that is recorded on the job.
    fn run(&self, input: &ComputationInput) -> Result<Value, String>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Handle for resolving one running job.
pub struct Completion {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    job_id: JobId,
}

impl Completion {
    pub(crate) fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, job_id: JobId) -> Self {
        Self {
            store,
            clock,
            job_id,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn finish(self, outcome: Result<Value, String>) {
        let succeeded = outcome.is_ok();
        match crate::lifecycle::settle(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.job_id,
            outcome,
        ) {
            Ok(status) => tracing::info!(job_id = %self.job_id, %status, "job settled"),
            Err(err) => tracing::error!(
                job_id = %self.job_id,
                succeeded,
                error = %err,
                "could not record computation outcome"
            ),
        }
    }
}

pub struct Work {
    pub input: ComputationInput,
    pub completion: Completion,
}

pub trait Dispatch: Send + Sync {
    fn dispatch(&self, work: Work);

    fn is_available(&self) -> bool {
        true
    }
}

/// Runs the computation on the calling thread, after the store update that started the job.
pub struct InlineDispatcher {
    computation: Arc<dyn Computation>,
}

impl InlineDispatcher {
    pub fn new(computation: Arc<dyn Computation>) -> Self {
        Self { computation }
    }
}

impl Dispatch for InlineDispatcher {
    fn dispatch(&self, work: Work) {
        let outcome = pool::run_guarded(self.computation.as_ref(), &work.input);
        work.completion.finish(outcome);
    }

    fn is_available(&self) -> bool {
        self.computation.is_available()
    }
}

/// Parks work until the owner drains it. Lets callers observe `running` jobs and settle them
/// on their own schedule.
#[derive(Default)]
pub struct DeferredDispatcher {
    queue: Mutex<Vec<Work>>,
}

impl DeferredDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Work> {
        match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dispatch for DeferredDispatcher {
    fn dispatch(&self, work: Work) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push(work),
            Err(poisoned) => poisoned.into_inner().push(work),
        }
    }
}
