#![forbid(unsafe_code)]

//! Fingerprints and signatures over submitted input.
//!
//! Two fingerprint rules coexist: `start_job` hashes the raw decoded file bytes, while
//! `provide_input` hashes the canonical JSON form of the supplied value. Both are SHA-256,
//! rendered as lowercase hex.

mod signer;

pub use signer::{Ed25519Signer, Signer, SignerError};

#[cfg(test)]
pub(crate) use signer::InsecureTestSigner;

use base64::Engine as _;
use serde_json::{Map, Value};
use sha2::Digest as _;
use std::fmt::Write as _;

const SIGNING_DOMAIN: &str = "mip003/provide_input/v1";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint_bytes(payload: &[u8]) -> Digest {
    let digest = sha2::Sha256::digest(payload);
    Digest(to_hex(&digest))
}

/// Object keys sorted at every depth; arrays keep their order.
pub fn canonicalize_json(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys = obj.keys().collect::<Vec<_>>();
            keys.sort();
            let mut out = Map::<String, Value>::new();
            for key in keys {
                if let Some(v) = obj.get(key) {
                    out.insert(key.clone(), canonicalize_json(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Compact serialization of [`canonicalize_json`].
pub fn canonical_json(value: &Value) -> String {
    canonicalize_json(value).to_string()
}

pub fn fingerprint_json(value: &Value) -> Digest {
    fingerprint_bytes(canonical_json(value).as_bytes())
}

fn signing_message(job_id: &str, status_id: &str, digest: &Digest) -> Vec<u8> {
    format!("{SIGNING_DOMAIN}\n{job_id}\n{status_id}\n{digest}").into_bytes()
}

/// Signs `(job_id, status_id, digest)` and returns the base64 signature.
pub fn authenticate(signer: &dyn Signer, job_id: &str, status_id: &str, digest: &Digest) -> String {
    let signature = signer.sign(&signing_message(job_id, status_id, digest));
    base64::engine::general_purpose::STANDARD.encode(signature)
}

pub fn verify_token(
    signer: &dyn Signer,
    job_id: &str,
    status_id: &str,
    digest: &Digest,
    token: &str,
) -> bool {
    let Ok(signature) = base64::engine::general_purpose::STANDARD.decode(token.trim()) else {
        return false;
    };
    signer.verify(&signing_message(job_id, status_id, digest), &signature)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
