#![forbid(unsafe_code)]

//! Job lifecycle: the only code that mutates job records.
//!
//! Every operation is one store update whose mutator re-checks the preconditions against the
//! stored record, so concurrent callers racing on the same job see exactly one winner. Work for
//! the computation is dispatched after the update commits, never under the store lock.

mod error;

pub use error::LifecycleError;

use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::integrity::{self, Signer};
use crate::schema::{self, SchemaDescriptor};
use crate::worker::{Completion, ComputationInput, Dispatch, Work};
use mip_core::{ExtraInput, JobError, JobId, JobRecord, JobStatus, NewJob};
use mip_storage::{JobStore, StoreError};
use serde_json::{Map, Value};
use std::sync::Arc;

const HOUR_MS: i64 = 60 * 60 * 1_000;

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub agent_identifier: Option<String>,
    pub seller_vkey: Option<String>,
    /// When false, confirmed payment starts the computation directly.
    pub require_additional_input: bool,
    pub pay_by_offset_ms: i64,
    pub submit_result_offset_ms: i64,
    pub unlock_offset_ms: i64,
    pub external_dispute_unlock_offset_ms: i64,
    pub max_id_attempts: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            agent_identifier: None,
            seller_vkey: None,
            require_additional_input: true,
            pay_by_offset_ms: HOUR_MS,
            submit_result_offset_ms: 2 * HOUR_MS,
            unlock_offset_ms: 3 * HOUR_MS,
            external_dispute_unlock_offset_ms: 4 * HOUR_MS,
            max_id_attempts: 8,
        }
    }
}

/// Descriptor handed back by `create_job`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobCreated {
    pub job_id: JobId,
    pub status_id: String,
    pub blockchain_identifier: String,
    pub purchaser_identifier: String,
    pub input_hash: String,
    pub pay_by_ms: i64,
    pub submit_result_by_ms: i64,
    pub unlock_ms: i64,
    pub external_dispute_unlock_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputAccepted {
    pub input_hash: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Present only while the job waits for input.
    pub input_schema: Option<&'static SchemaDescriptor>,
}

/// The two shapes `provide_input` accepts. Exactly one must be supplied.
#[derive(Clone, Debug, PartialEq)]
pub enum SuppliedInput {
    Data(Map<String, Value>),
    Groups(Vec<Value>),
}

impl SuppliedInput {
    /// JSON `null` counts as absent.
    pub fn from_parts(
        input_data: Option<&Value>,
        input_groups: Option<&Value>,
    ) -> Result<Self, LifecycleError> {
        let input_data = input_data.filter(|value| !value.is_null());
        let input_groups = input_groups.filter(|value| !value.is_null());
        match (input_data, input_groups) {
            (Some(_), Some(_)) => Err(LifecycleError::validation(
                "provide exactly one of input_data or input_groups, not both",
            )),
            (None, None) => Err(LifecycleError::validation(
                "provide exactly one of input_data or input_groups",
            )),
            (Some(Value::Object(data)), None) => Ok(Self::Data(data.clone())),
            (Some(_), None) => Err(LifecycleError::validation("input_data must be an object")),
            (None, Some(Value::Array(groups))) => Ok(Self::Groups(groups.clone())),
            (None, Some(_)) => Err(LifecycleError::validation("input_groups must be an array")),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Data(data) => Value::Object(data),
            Self::Groups(groups) => Value::Array(groups),
        }
    }
}

pub struct JobController {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    signer: Arc<dyn Signer>,
    dispatcher: Arc<dyn Dispatch>,
    schema: &'static SchemaDescriptor,
    config: LifecycleConfig,
}

impl JobController {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        signer: Arc<dyn Signer>,
        dispatcher: Arc<dyn Dispatch>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            signer,
            dispatcher,
            schema: schema::describe(),
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn schema(&self) -> &'static SchemaDescriptor {
        self.schema
    }

    pub fn is_available(&self) -> bool {
        self.dispatcher.is_available()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Validates a submission and records a new job in `awaiting_payment`.
    ///
    /// A missing `input_data` is treated as an empty object so the schema can name the first
    /// missing field.
    pub fn create_job(
        &self,
        identifier: Option<&Value>,
        input_data: Option<&Value>,
    ) -> Result<JobCreated, LifecycleError> {
        let empty = Map::new();
        let input_data = match input_data {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(data)) => data,
            Some(_) => return Err(LifecycleError::validation("input_data must be an object")),
        };
        let submission = self
            .schema
            .validate_submission(identifier, input_data)
            .map_err(|violation| {
                tracing::debug!(error = %violation, "start_job rejected");
                LifecycleError::Validation(violation.0)
            })?;
        let input_hash = integrity::fingerprint_bytes(&submission.payload).into_string();
        let now = self.clock.now_ms();

        let attempts = self.config.max_id_attempts.max(1);
        for attempt in 1..=attempts {
            let issued = self.ids.issue().map_err(|err| {
                tracing::error!(error = %err, "id generator produced an invalid id");
                LifecycleError::Internal("could not allocate job identifiers".to_string())
            })?;
            let record = JobRecord::new(NewJob {
                job_id: issued.job_id,
                status_id: issued.status_id,
                purchaser_identifier: submission.purchaser_identifier.clone(),
                submitted_payload: submission.payload.clone(),
                input_hash: input_hash.clone(),
                blockchain_identifier: issued.blockchain_identifier,
                created_at_ms: now,
                pay_by_ms: now.saturating_add(self.config.pay_by_offset_ms),
                submit_result_by_ms: now.saturating_add(self.config.submit_result_offset_ms),
                unlock_ms: now.saturating_add(self.config.unlock_offset_ms),
                external_dispute_unlock_ms: now
                    .saturating_add(self.config.external_dispute_unlock_offset_ms),
            });
            let created = JobCreated {
                job_id: record.job_id.clone(),
                status_id: record.status_id.as_str().to_string(),
                blockchain_identifier: record.blockchain_identifier.clone(),
                purchaser_identifier: record.purchaser_identifier.clone(),
                input_hash: record.input_hash.clone(),
                pay_by_ms: record.pay_by_ms,
                submit_result_by_ms: record.submit_result_by_ms,
                unlock_ms: record.unlock_ms,
                external_dispute_unlock_ms: record.external_dispute_unlock_ms,
            };
            match self.store.create(record) {
                Ok(()) => {
                    tracing::info!(
                        job_id = %created.job_id,
                        status = %JobStatus::AwaitingPayment,
                        input_hash = %created.input_hash,
                        "job created"
                    );
                    return Ok(created);
                }
                Err(StoreError::DuplicateId { id }) => {
                    tracing::warn!(attempt, field = %id, "generated id collided, retrying");
                }
                Err(err) => return Err(LifecycleError::from_store(err, created.job_id.as_str())),
            }
        }
        tracing::error!(attempts, "every generated id collided");
        Err(LifecycleError::Internal(
            "could not allocate unique job identifiers".to_string(),
        ))
    }

    /// Records confirmed payment. Jobs needing no further input start computing immediately.
    pub fn advance_on_payment(&self, job_id: &str) -> Result<JobStatus, LifecycleError> {
        let id = parse_job_id(job_id)?;
        let requires_input = self.config.require_additional_input;
        let now = self.clock.now_ms();
        let record = self
            .store
            .update(&id, &mut |job| job.confirm_payment(requires_input, now))
            .map_err(|err| self.refused(err, job_id, "payment confirmation rejected"))?;
        tracing::info!(job_id = %record.job_id, status = %record.status, "payment confirmed");

        if record.status == JobStatus::Running {
            self.dispatch(&record, None);
        }
        Ok(record.status)
    }

    /// Accepts the deferred input of a job in `awaiting_input`, signs its fingerprint and starts
    /// the computation.
    ///
    /// Checks run in a fixed order: input shape, existence, state, then `status_id`.
    pub fn provide_input(
        &self,
        job_id: &str,
        status_id: &str,
        input_data: Option<&Value>,
        input_groups: Option<&Value>,
    ) -> Result<InputAccepted, LifecycleError> {
        let supplied = SuppliedInput::from_parts(input_data, input_groups)?;
        let id = parse_job_id(job_id)?;

        let value = supplied.into_value();
        let canonical = integrity::canonical_json(&value);
        let digest = integrity::fingerprint_bytes(canonical.as_bytes());
        let now = self.clock.now_ms();
        let signer = self.signer.as_ref();

        let record = self
            .store
            .update(&id, &mut |job| {
                job.ensure_accepts_input(status_id)?;
                // Signed only after the capability check, so a wrong status_id never yields a token.
                let signature = integrity::authenticate(
                    signer,
                    job.job_id.as_str(),
                    job.status_id.as_str(),
                    &digest,
                );
                job.attach_extra_input(
                    status_id,
                    ExtraInput {
                        canonical_json: canonical.clone(),
                        input_hash: digest.as_str().to_string(),
                        signature,
                    },
                    now,
                )
            })
            .map_err(|err| self.refused(err, job_id, "provide_input rejected"))?;

        let signature = record.extra_input_signature.clone().ok_or_else(|| {
            tracing::error!(job_id, "accepted input has no stored signature");
            LifecycleError::Internal("input signature missing".to_string())
        })?;
        tracing::info!(
            job_id = %record.job_id,
            status = %record.status,
            input_hash = %digest,
            "additional input accepted"
        );

        self.dispatch(&record, Some(value));
        Ok(InputAccepted {
            input_hash: digest.into_string(),
            signature,
        })
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatusView, LifecycleError> {
        let id = parse_job_id(job_id)?;
        let record = self
            .store
            .get(&id)
            .map_err(|err| LifecycleError::from_store(err, job_id))?
            .ok_or_else(|| LifecycleError::NotFound {
                job_id: job_id.to_string(),
            })?;

        let result = match record.result_json.as_deref() {
            Some(raw) => Some(serde_json::from_str::<Value>(raw).map_err(|err| {
                tracing::error!(job_id, error = %err, "stored result is not JSON");
                LifecycleError::Internal("stored result is unreadable".to_string())
            })?),
            None => None,
        };
        let input_schema = (record.status == JobStatus::AwaitingInput).then_some(self.schema);
        Ok(JobStatusView {
            job_id: record.job_id,
            status: record.status,
            result,
            error: record.error,
            input_schema,
        })
    }

    /// `running → completed`.
    pub fn complete(&self, job_id: &str, result: Value) -> Result<JobStatus, LifecycleError> {
        let id = parse_job_id(job_id)?;
        settle(self.store.as_ref(), self.clock.as_ref(), &id, Ok(result))
    }

    /// Any live state `→ failed`.
    pub fn fail(&self, job_id: &str, reason: &str) -> Result<JobStatus, LifecycleError> {
        let id = parse_job_id(job_id)?;
        settle(
            self.store.as_ref(),
            self.clock.as_ref(),
            &id,
            Err(reason.to_string()),
        )
    }

    /// Fails every job still waiting for payment after `payByTime`, or for input after
    /// `submitResultTime`. Returns the ids that were failed by this call.
    pub fn reap_expired(&self, now_ms: i64) -> Result<Vec<JobId>, LifecycleError> {
        let waiting = self
            .store
            .list_by_status(
                &[JobStatus::AwaitingPayment, JobStatus::AwaitingInput],
                usize::MAX,
            )
            .map_err(|err| LifecycleError::from_store(err, "*"))?;

        let mut reaped = Vec::new();
        for candidate in waiting {
            if candidate.missed_deadline(now_ms).is_none() {
                continue;
            }
            let outcome = self.store.update(&candidate.job_id, &mut |job| {
                let Some(deadline) = job.missed_deadline(now_ms) else {
                    // Moved on since the scan.
                    return Err(JobError::InvalidTransition {
                        job_id: job.job_id.as_str().to_string(),
                        from: job.status,
                        to: JobStatus::Failed,
                    });
                };
                job.fail(format!("{deadline} passed"), now_ms)
            });
            match outcome {
                Ok(record) => {
                    tracing::info!(
                        job_id = %record.job_id,
                        status = %record.status,
                        reason = record.error.as_deref().unwrap_or_default(),
                        "expired job failed"
                    );
                    reaped.push(record.job_id);
                }
                Err(StoreError::Rejected(_)) | Err(StoreError::UnknownId) => {}
                Err(err) => {
                    return Err(LifecycleError::from_store(err, candidate.job_id.as_str()));
                }
            }
        }
        Ok(reaped)
    }

    fn dispatch(&self, record: &JobRecord, extra_input: Option<Value>) {
        let work = Work {
            input: ComputationInput {
                job_id: record.job_id.clone(),
                payload: record.submitted_payload.clone(),
                extra_input,
            },
            completion: Completion::new(
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                record.job_id.clone(),
            ),
        };
        tracing::debug!(job_id = %record.job_id, "computation dispatched");
        self.dispatcher.dispatch(work);
    }

    fn refused(&self, err: StoreError, job_id: &str, what: &'static str) -> LifecycleError {
        let err = LifecycleError::from_store(err, job_id);
        if !matches!(err, LifecycleError::Internal(_)) {
            tracing::debug!(job_id, kind = err.kind(), error = %err, "{}", what);
        }
        err
    }
}

/// Records the computation outcome of a running job. Failures are accepted from any live state.
pub(crate) fn settle(
    store: &dyn JobStore,
    clock: &dyn Clock,
    job_id: &JobId,
    outcome: Result<Value, String>,
) -> Result<JobStatus, LifecycleError> {
    let now = clock.now_ms();
    let record = match outcome {
        Ok(result) => {
            let result_json = result.to_string();
            store.update(job_id, &mut |job| job.complete(result_json.clone(), now))
        }
        Err(reason) => store.update(job_id, &mut |job| job.fail(reason.clone(), now)),
    }
    .map_err(|err| LifecycleError::from_store(err, job_id.as_str()))?;
    Ok(record.status)
}

/// Ids that fail validation cannot name a stored job.
fn parse_job_id(raw: &str) -> Result<JobId, LifecycleError> {
    JobId::try_new(raw.trim()).map_err(|_| LifecycleError::NotFound {
        job_id: raw.to_string(),
    })
}
