#![forbid(unsafe_code)]

//! MIP-003 request handling, independent of the HTTP server.
//!
//! Each handler takes the already-extracted pieces of a request (query value, content type,
//! raw body) and returns a [`Reply`]: a status code plus the JSON body to send. Errors are always
//! rendered as `{"status": "error", "message": ...}`.

mod wire;

use crate::clock::ms_to_unix_secs;
use crate::lifecycle::{JobController, LifecycleError};
use crate::{SERVICE_NAME, SERVICE_VERSION};
use mip_core::JobStatus;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use wire::{PaymentRequest, ProvideInputRequest, StartJobRequest};

pub const AVAILABLE_MESSAGE: &str = "MIP-003 agent is online";
pub const UNAVAILABLE_MESSAGE: &str = "MIP-003 agent has no computation backend configured";

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn json<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self::ok(body),
            Err(err) => {
                tracing::error!(error = %err, "response serialization failed");
                Self::error(500, "internal error")
            }
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "status": "error", "message": message.into() }),
        }
    }

    fn from_lifecycle(err: &LifecycleError) -> Self {
        Self::error(status_code(err), err.to_string())
    }
}

pub fn status_code(err: &LifecycleError) -> u16 {
    match err {
        LifecycleError::Validation(_) => 400,
        LifecycleError::Unauthorized { .. } => 403,
        LifecycleError::NotFound { .. } => 404,
        LifecycleError::InvalidTransition { .. } => 409,
        LifecycleError::CapacityExceeded { .. } => 503,
        LifecycleError::Internal(_) => 500,
    }
}

/// `application/json` or any `application/*+json`, parameters ignored.
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(raw) = content_type else {
        return false;
    };
    let mime = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

pub struct Protocol {
    controller: Arc<JobController>,
    payment_hook_token: Option<String>,
}

impl Protocol {
    pub fn new(controller: Arc<JobController>) -> Self {
        Self {
            controller,
            payment_hook_token: None,
        }
    }

    /// Enables `payment_confirmed`, guarded by a bearer token.
    pub fn with_payment_hook(mut self, token: Option<String>) -> Self {
        self.payment_hook_token = token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn controller(&self) -> &Arc<JobController> {
        &self.controller
    }

    pub fn payment_hook_enabled(&self) -> bool {
        self.payment_hook_token.is_some()
    }

    pub fn root(&self) -> Reply {
        Reply::ok(json!({ "message": "MIP-003 agent ready" }))
    }

    pub fn health(&self) -> Reply {
        Reply::ok(json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "version": SERVICE_VERSION,
        }))
    }

    pub fn availability(&self) -> Reply {
        let (status, message) = if self.controller.is_available() {
            ("available", AVAILABLE_MESSAGE)
        } else {
            ("unavailable", UNAVAILABLE_MESSAGE)
        };
        Reply::ok(json!({
            "status": status,
            "type": "masumi-agent",
            "message": message,
        }))
    }

    pub fn input_schema(&self) -> Reply {
        Reply::ok(self.controller.schema().to_json())
    }

    pub fn start_job(&self, content_type: Option<&str>, body: &[u8]) -> Reply {
        let request = match parse_body::<StartJobRequest>(content_type, body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        let created = match self.controller.create_job(
            request.identifier_from_purchaser.as_ref(),
            request.input_data.as_ref(),
        ) {
            Ok(created) => created,
            Err(err) => return Reply::from_lifecycle(&err),
        };

        let config = self.controller.config();
        Reply::json(&wire::StartJobResponse {
            id: created.status_id,
            status: "success",
            job_id: created.job_id.into_string(),
            blockchain_identifier: created.blockchain_identifier,
            pay_by_time: ms_to_unix_secs(created.pay_by_ms),
            submit_result_time: ms_to_unix_secs(created.submit_result_by_ms),
            unlock_time: ms_to_unix_secs(created.unlock_ms),
            external_dispute_unlock_time: ms_to_unix_secs(created.external_dispute_unlock_ms),
            agent_identifier: config.agent_identifier.clone(),
            seller_vkey: config.seller_vkey.clone(),
            identifier_from_purchaser: created.purchaser_identifier,
            input_hash: created.input_hash,
        })
    }

    pub fn status(&self, job_id: Option<&str>) -> Reply {
        let Some(job_id) = job_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Reply::error(400, "job_id required");
        };
        let view = match self.controller.get_status(job_id) {
            Ok(view) => view,
            Err(err) => return Reply::from_lifecycle(&err),
        };

        let message = match view.status {
            JobStatus::Failed => view.error,
            _ => None,
        };
        Reply::json(&wire::StatusResponse {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: view.job_id.into_string(),
            status: view.status.as_str(),
            result: view.result.unwrap_or(Value::Null),
            input_schema: view.input_schema.map(|schema| schema.to_json()),
            message,
        })
    }

    pub fn provide_input(&self, content_type: Option<&str>, body: &[u8]) -> Reply {
        let request = match parse_body::<ProvideInputRequest>(content_type, body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        let (Some(job_id), Some(status_id)) = (
            request.job_id.as_deref().filter(|id| !id.trim().is_empty()),
            request.status_id.as_deref().filter(|id| !id.trim().is_empty()),
        ) else {
            return Reply::error(400, "job_id and status_id required");
        };
        match self.controller.provide_input(
            job_id,
            status_id,
            request.input_data.as_ref(),
            request.input_groups.as_ref(),
        ) {
            Ok(accepted) => Reply::json(&wire::ProvideInputResponse {
                status: "success",
                input_hash: accepted.input_hash,
                signature: accepted.signature,
            }),
            Err(err) => Reply::from_lifecycle(&err),
        }
    }

    /// Payment-confirmation hook. Answers 404 while no token is configured.
    pub fn payment_confirmed(
        &self,
        authorization: Option<&str>,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Reply {
        let Some(expected) = self.payment_hook_token.as_deref() else {
            return Reply::error(404, "payment hook is disabled");
        };
        let presented = authorization
            .and_then(|value| value.trim().strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();
        if !token_matches(expected, presented) {
            tracing::debug!("payment hook called with a bad token");
            return Reply::error(403, "invalid payment hook token");
        }

        let request = match parse_body::<PaymentRequest>(content_type, body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };
        let Some(job_id) = request.job_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            return Reply::error(400, "job_id required");
        };
        match self.controller.advance_on_payment(job_id) {
            Ok(status) => Reply::ok(json!({
                "status": "success",
                "job_id": job_id.trim(),
                "job_status": status.as_str(),
            })),
            Err(err) => Reply::from_lifecycle(&err),
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<T, Reply> {
    if !is_json_content_type(content_type) {
        return Err(Reply::error(415, "Content-Type must be application/json"));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| Reply::error(400, format!("Invalid JSON body: {err}")))?;
    if !value.is_object() {
        return Err(Reply::error(400, "request body must be a JSON object"));
    }
    serde_json::from_value(value).map_err(|err| Reply::error(400, format!("Invalid request: {err}")))
}

fn token_matches(expected: &str, presented: &str) -> bool {
    let (expected, presented) = (expected.as_bytes(), presented.as_bytes());
    expected.len() == presented.len()
        && expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
