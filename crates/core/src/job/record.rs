#![forbid(unsafe_code)]

use super::{JobError, JobStatus};
use crate::ids::{JobId, StatusId};

/// Everything the controller decides before a job exists; the record derives the rest.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub job_id: JobId,
    pub status_id: StatusId,
    pub purchaser_identifier: String,
    pub submitted_payload: Vec<u8>,
    pub input_hash: String,
    pub blockchain_identifier: String,
    pub created_at_ms: i64,
    pub pay_by_ms: i64,
    pub submit_result_by_ms: i64,
    pub unlock_ms: i64,
    pub external_dispute_unlock_ms: i64,
}

/// Deferred input accepted through `provide_input`, with the fingerprint and signature handed
/// back to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraInput {
    pub canonical_json: String,
    pub input_hash: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status_id: StatusId,
    pub status: JobStatus,
    pub purchaser_identifier: String,
    pub submitted_payload: Vec<u8>,
    pub input_hash: String,
    pub blockchain_identifier: String,
    pub extra_input_json: Option<String>,
    pub extra_input_hash: Option<String>,
    pub extra_input_signature: Option<String>,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub pay_by_ms: i64,
    pub submit_result_by_ms: i64,
    pub unlock_ms: i64,
    pub external_dispute_unlock_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub revision: i64,
}

impl JobRecord {
    pub fn new(job: NewJob) -> Self {
        Self {
            job_id: job.job_id,
            status_id: job.status_id,
            status: JobStatus::AwaitingPayment,
            purchaser_identifier: job.purchaser_identifier,
            submitted_payload: job.submitted_payload,
            input_hash: job.input_hash,
            blockchain_identifier: job.blockchain_identifier,
            extra_input_json: None,
            extra_input_hash: None,
            extra_input_signature: None,
            result_json: None,
            error: None,
            pay_by_ms: job.pay_by_ms,
            submit_result_by_ms: job.submit_result_by_ms,
            unlock_ms: job.unlock_ms,
            external_dispute_unlock_ms: job.external_dispute_unlock_ms,
            created_at_ms: job.created_at_ms,
            updated_at_ms: job.created_at_ms,
            revision: 0,
        }
    }

    pub fn transition(&mut self, to: JobStatus, now_ms: i64) -> Result<(), JobError> {
        if !self.status.can_transition_to(to) {
            return Err(self.invalid_transition(to));
        }
        self.status = to;
        self.updated_at_ms = now_ms.max(self.updated_at_ms);
        self.revision += 1;
        Ok(())
    }

    /// Payment was confirmed externally. Jobs that need more input wait for it; the rest start.
    pub fn confirm_payment(&mut self, requires_input: bool, now_ms: i64) -> Result<(), JobError> {
        if self.status != JobStatus::AwaitingPayment {
            let to = if requires_input {
                JobStatus::AwaitingInput
            } else {
                JobStatus::Running
            };
            return Err(self.invalid_transition(to));
        }
        if requires_input {
            self.transition(JobStatus::AwaitingInput, now_ms)
        } else {
            self.transition(JobStatus::Running, now_ms)
        }
    }

    /// State is checked before the capability so callers learn why a late call was refused.
    pub fn ensure_accepts_input(&self, presented_status_id: &str) -> Result<(), JobError> {
        if self.status != JobStatus::AwaitingInput || self.extra_input_json.is_some() {
            return Err(self.invalid_transition(JobStatus::Running));
        }
        if !self.status_id.matches(presented_status_id) {
            return Err(JobError::Unauthorized {
                job_id: self.job_id.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn attach_extra_input(
        &mut self,
        presented_status_id: &str,
        input: ExtraInput,
        now_ms: i64,
    ) -> Result<(), JobError> {
        self.ensure_accepts_input(presented_status_id)?;
        self.transition(JobStatus::Running, now_ms)?;
        self.extra_input_json = Some(input.canonical_json);
        self.extra_input_hash = Some(input.input_hash);
        self.extra_input_signature = Some(input.signature);
        Ok(())
    }

    pub fn complete(&mut self, result_json: String, now_ms: i64) -> Result<(), JobError> {
        if self.status != JobStatus::Running {
            return Err(self.invalid_transition(JobStatus::Completed));
        }
        self.transition(JobStatus::Completed, now_ms)?;
        self.result_json = Some(result_json);
        Ok(())
    }

    pub fn fail(&mut self, reason: String, now_ms: i64) -> Result<(), JobError> {
        self.transition(JobStatus::Failed, now_ms)?;
        self.error = Some(reason);
        Ok(())
    }

    /// Name of the deadline a waiting job has missed, if any.
    pub fn missed_deadline(&self, now_ms: i64) -> Option<&'static str> {
        match self.status {
            JobStatus::AwaitingPayment if now_ms > self.pay_by_ms => Some("payByTime"),
            JobStatus::AwaitingInput if now_ms > self.submit_result_by_ms => {
                Some("submitResultTime")
            }
            _ => None,
        }
    }

    fn invalid_transition(&self, to: JobStatus) -> JobError {
        JobError::InvalidTransition {
            job_id: self.job_id.as_str().to_string(),
            from: self.status,
            to,
        }
    }
}
