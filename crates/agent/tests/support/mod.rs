#![allow(dead_code)]

use mip_agent::protocol::Protocol;
use mip_agent::{
    Computation, ComputationInput, DeferredDispatcher, Dispatch, Ed25519Signer, JobController,
    LifecycleConfig, ManualClock, SequentialIds,
};
use mip_storage::{JobStore, MemoryJobStore};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const T0_MS: i64 = 1_700_000_000_000;
pub const HELLO_B64: &str = "aGVsbG8=";
pub const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
pub const SIGNING_SEED: [u8; 32] = [42u8; 32];

pub struct Fixture {
    pub controller: Arc<JobController>,
    pub clock: Arc<ManualClock>,
    pub signer: Arc<Ed25519Signer>,
    pub store: Arc<dyn JobStore>,
}

impl Fixture {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self::with_config(store, dispatcher, LifecycleConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn Dispatch>,
        config: LifecycleConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(T0_MS));
        let signer = Arc::new(Ed25519Signer::from_seed(SIGNING_SEED));
        let controller = Arc::new(JobController::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::new(SequentialIds::new()),
            signer.clone(),
            dispatcher,
            config,
        ));
        Self {
            controller,
            clock,
            signer,
            store,
        }
    }

    pub fn deferred() -> (Self, Arc<DeferredDispatcher>) {
        let dispatcher = Arc::new(DeferredDispatcher::new());
        let fixture = Self::new(Arc::new(MemoryJobStore::new(64)), dispatcher.clone());
        (fixture, dispatcher)
    }

    pub fn protocol(&self, payment_hook_token: Option<&str>) -> Protocol {
        Protocol::new(Arc::clone(&self.controller))
            .with_payment_hook(payment_hook_token.map(str::to_string))
    }

    /// Creates a job and confirms payment; returns `(job_id, status_id)`.
    pub fn job_awaiting_input(&self) -> (String, String) {
        let created = self
            .controller
            .create_job(Some(&json!("buyer")), Some(&json!({ "html_file": HELLO_B64 })))
            .expect("create job");
        self.controller
            .advance_on_payment(created.job_id.as_str())
            .expect("confirm payment");
        (created.job_id.into_string(), created.status_id)
    }

    /// Polls until the job leaves `running`, for dispatchers that run on other threads.
    pub fn wait_settled(&self, job_id: &str) -> mip_agent::JobStatusView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let view = self.controller.get_status(job_id).expect("status");
            if view.status.is_terminal() || Instant::now() > deadline {
                return view;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Computation that remembers every input and answers from a closure.
pub struct RecordingComputation {
    seen: Mutex<Vec<ComputationInput>>,
    answer: Box<dyn Fn(&ComputationInput) -> Result<Value, String> + Send + Sync>,
}

impl RecordingComputation {
    pub fn new(
        answer: impl Fn(&ComputationInput) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            answer: Box::new(answer),
        }
    }

    pub fn echo_payload_len() -> Self {
        Self::new(|input| Ok(json!({ "payload_len": input.payload.len() })))
    }

    pub fn seen(&self) -> Vec<ComputationInput> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl Computation for RecordingComputation {
    fn run(&self, input: &ComputationInput) -> Result<Value, String> {
        self.seen.lock().expect("seen lock").push(input.clone());
        (self.answer)(input)
    }
}
