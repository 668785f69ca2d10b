#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(super) struct StartJobRequest {
    #[serde(default)]
    pub identifier_from_purchaser: Option<Value>,
    #[serde(default)]
    pub input_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProvideInputRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
    #[serde(default)]
    pub input_data: Option<Value>,
    #[serde(default)]
    pub input_groups: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PaymentRequest {
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Field names follow the MIP-003 registry: mostly camelCase, with `id`, `job_id` and
/// `input_hash` kept as-is.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartJobResponse {
    pub id: String,
    pub status: &'static str,
    #[serde(rename = "job_id")]
    pub job_id: String,
    pub blockchain_identifier: String,
    pub pay_by_time: i64,
    pub submit_result_time: i64,
    pub unlock_time: i64,
    pub external_dispute_unlock_time: i64,
    pub agent_identifier: Option<String>,
    #[serde(rename = "sellerVKey")]
    pub seller_vkey: Option<String>,
    pub identifier_from_purchaser: String,
    #[serde(rename = "input_hash")]
    pub input_hash: String,
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    pub id: String,
    pub job_id: String,
    pub status: &'static str,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ProvideInputResponse {
    pub status: &'static str,
    pub input_hash: String,
    pub signature: String,
}
