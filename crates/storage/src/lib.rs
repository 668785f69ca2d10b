#![forbid(unsafe_code)]

mod jobs;

pub use jobs::{JobStore, MemoryJobStore, Mutator, SqliteJobStore, StoreError};

/// Upper bound on retained jobs when the caller does not pick one.
pub const DEFAULT_MAX_JOBS: usize = 10_000;
