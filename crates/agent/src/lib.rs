#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod http;
pub mod ids;
pub mod integrity;
pub mod lifecycle;
pub mod protocol;
pub mod schema;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{IdGenerator, IssuedIds, SequentialIds, UuidIds};
pub use integrity::{Digest, Ed25519Signer, Signer};
pub use lifecycle::{
    InputAccepted, JobController, JobCreated, JobStatusView, LifecycleConfig, LifecycleError,
};
pub use protocol::{Protocol, Reply};
pub use schema::SchemaDescriptor;
pub use worker::{
    CommandComputation, Computation, ComputationInput, DeferredDispatcher, Dispatch,
    InlineDispatcher, UnconfiguredComputation, WorkerPool,
};

pub const SERVICE_NAME: &str = "mip003-agent";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
