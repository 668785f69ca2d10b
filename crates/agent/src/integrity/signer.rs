#![forbid(unsafe_code)]

use super::to_hex;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _};
use std::io::Write as _;
use std::path::{Path, PathBuf};

const KEY_LEN: usize = 32;

/// Asymmetric signing capability held by the service.
pub trait Signer: Send + Sync {
    fn algorithm(&self) -> &'static str;

    fn public_key_hex(&self) -> String;

    fn sign(&self, message: &[u8]) -> Vec<u8>;

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing key io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("signing key file {path} holds {len} bytes, expected {KEY_LEN}")]
    InvalidKeyFile { path: PathBuf, len: usize },
}

pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_seed(seed: [u8; KEY_LEN]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Reads the 32-byte secret at `path`, or creates one there (owner-only on unix).
    pub fn load_or_generate(path: &Path) -> Result<Self, SignerError> {
        let io_err = |source| SignerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if path.exists() {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let seed: [u8; KEY_LEN] =
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| SignerError::InvalidKeyFile {
                        path: path.to_path_buf(),
                        len: bytes.len(),
                    })?;
            return Ok(Self::from_seed(seed));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let signer = Self::generate();
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(io_err)?;
        file.write_all(&signer.key.to_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        tracing::info!(path = %path.display(), "generated new signing key");
        Ok(signer)
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl Signer for Ed25519Signer {
    fn algorithm(&self) -> &'static str {
        "ed25519"
    }

    fn public_key_hex(&self) -> String {
        to_hex(self.key.verifying_key().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        self.key.verifying_key().verify(message, &signature).is_ok()
    }
}

/// NOT A SIGNATURE. Echoes the message back so tests can assert on exactly what was signed.
/// Compiled only for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct InsecureTestSigner;

#[cfg(test)]
impl Signer for InsecureTestSigner {
    fn algorithm(&self) -> &'static str {
        "insecure-test-echo"
    }

    fn public_key_hex(&self) -> String {
        String::new()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        message.to_vec()
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        message == signature
    }
}
