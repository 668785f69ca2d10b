#![forbid(unsafe_code)]

//! Static description of what `start_job` expects. The same descriptor validates submissions,
//! answers `GET /input_schema`, and is echoed by `status` while a job awaits input.

use base64::Engine as _;
use serde_json::{Map, Value, json};

pub const IDENTIFIER_FIELD: &str = "identifier_from_purchaser";

const REQUEST_ENVELOPE_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String {
        placeholder: &'static str,
    },
    File {
        accept: &'static str,
        max_size: usize,
        /// Decoded bytes must be UTF-8 (text documents such as `.html`).
        text: bool,
    },
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::File { .. } => "file",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub fields: &'static [FieldSpec],
}

pub static INPUT_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    fields: &[
        FieldSpec {
            id: IDENTIFIER_FIELD,
            name: "Job Identifier",
            kind: FieldKind::String {
                placeholder: "Enter job ID (ex: job123, user1-analysis)",
            },
            required: true,
        },
        FieldSpec {
            id: "html_file",
            name: "Google Pay Activity File (.html)",
            kind: FieldKind::File {
                accept: ".html",
                max_size: 5_000_000,
                text: true,
            },
            required: true,
        },
    ],
};

pub fn describe() -> &'static SchemaDescriptor {
    &INPUT_SCHEMA
}

/// A submission that satisfied every field rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub purchaser_identifier: String,
    /// Decoded bytes of the first file field; empty when the schema declares none.
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SchemaViolation(pub String);

impl SchemaDescriptor {
    /// Largest request body a valid submission can need: every file field at `maxSize` once
    /// base64-encoded, room for line breaks escaped into the JSON string, plus the envelope.
    pub fn max_request_bytes(&self) -> usize {
        let encoded = self
            .fields
            .iter()
            .map(|field| match field.kind {
                FieldKind::File { max_size, .. } => max_size.div_ceil(3).saturating_mul(4),
                FieldKind::String { .. } => 0,
            })
            .fold(0usize, usize::saturating_add);
        encoded
            .saturating_add(encoded / 8)
            .saturating_add(REQUEST_ENVELOPE_BYTES)
    }

    pub fn to_json(&self) -> Value {
        let fields = self.fields.iter().map(field_json).collect::<Vec<_>>();
        json!({ "input_data": fields })
    }

    /// `identifier` is the top-level `identifier_from_purchaser`; when absent it is looked up in
    /// `input_data`, where form-driven callers put it.
    pub fn validate_submission(
        &self,
        identifier: Option<&Value>,
        input_data: &Map<String, Value>,
    ) -> Result<Submission, SchemaViolation> {
        let mut purchaser_identifier = None;
        let mut payload = None;

        for field in self.fields {
            let value = if field.id == IDENTIFIER_FIELD {
                identifier
                    .filter(|value| !value.is_null())
                    .or_else(|| input_data.get(field.id))
            } else {
                input_data.get(field.id)
            };
            let Some(value) = value.filter(|value| !is_blank(value)) else {
                if field.required {
                    return Err(SchemaViolation(format!("{} required", field.id)));
                }
                continue;
            };

            match field.kind {
                FieldKind::String { .. } => {
                    let Some(text) = value.as_str() else {
                        return Err(SchemaViolation(format!("{} must be a string", field.id)));
                    };
                    if field.id == IDENTIFIER_FIELD {
                        purchaser_identifier = Some(text.trim().to_string());
                    }
                }
                FieldKind::File { max_size, text, .. } => {
                    let bytes = decode_file(field.id, value, max_size, text)?;
                    if payload.is_none() {
                        payload = Some(bytes);
                    }
                }
            }
        }

        let Some(purchaser_identifier) = purchaser_identifier else {
            return Err(SchemaViolation(format!("{IDENTIFIER_FIELD} required")));
        };
        Ok(Submission {
            purchaser_identifier,
            payload: payload.unwrap_or_default(),
        })
    }
}

fn field_json(field: &FieldSpec) -> Value {
    let data = match field.kind {
        FieldKind::String { placeholder } => json!({ "placeholder": placeholder }),
        FieldKind::File {
            accept, max_size, ..
        } => json!({
            "accept": accept,
            "maxSize": max_size,
            "outputFormat": "base64"
        }),
    };
    let validations = if field.required {
        vec![json!({ "type": "required" })]
    } else {
        Vec::new()
    };
    json!({
        "id": field.id,
        "type": field.kind.as_str(),
        "name": field.name,
        "data": data,
        "validations": validations
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn decode_file(
    field_id: &str,
    value: &Value,
    max_size: usize,
    text: bool,
) -> Result<Vec<u8>, SchemaViolation> {
    let Some(raw) = value.as_str() else {
        return Err(SchemaViolation(format!(
            "{field_id} must be a base64 string"
        )));
    };
    // Browsers hand over data URLs; only the part after the comma is base64.
    let encoded = match raw.trim().split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw.trim(),
    };
    let compact = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    if compact.len() / 4 * 3 > max_size.saturating_add(3) {
        return Err(SchemaViolation(format!(
            "{field_id} exceeds maxSize ({max_size} bytes)"
        )));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| SchemaViolation(format!("Invalid base64 file: {err}")))?;
    if bytes.len() > max_size {
        return Err(SchemaViolation(format!(
            "{field_id} exceeds maxSize ({max_size} bytes)"
        )));
    }
    if text && std::str::from_utf8(&bytes).is_err() {
        return Err(SchemaViolation(format!(
            "Invalid base64 file: {field_id} is not UTF-8 text"
        )));
    }
    Ok(bytes)
}
