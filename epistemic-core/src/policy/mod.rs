//! Versioned, optionally signed policy documents that compile down to
//! a `MonitorConfig`.

pub mod compiler;
pub mod manager;
pub mod validator;

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EpistemicError;
use crate::ledger::canonical::{canonical_json_bytes, sha256_hex};

pub use compiler::Compiler;
pub use validator::{PolicyValidator, ValidationResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Escalation {
    #[serde(default)]
    pub halt_on_critical: bool,
    #[serde(default = "default_true")]
    pub auto_log: bool,
}

fn default_true() -> bool {
    true
}

/// The policy document proper: a name, description, version, a list of
/// loosely-typed rule specifications, escalation flags, and free-form
/// metadata. Rules stay as JSON values here (not a closed enum) so the
/// compiler can observe and reject/ignore truly unknown rule types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub version: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub rules: Vec<Value>,
    #[serde(default)]
    pub escalation: Escalation,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A policy document plus its content hash and optional signature over
/// that hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub config: PolicyConfig,
    pub policy_hash: String,
    pub signature: Option<Vec<u8>>,
    pub public_key: Option<[u8; 32]>,
}

impl Policy {
    pub fn new(config: PolicyConfig) -> Result<Self, EpistemicError> {
        let policy_hash = Self::hash_config(&config)?;
        Ok(Policy {
            config,
            policy_hash,
            signature: None,
            public_key: None,
        })
    }

    pub fn hash_config(config: &PolicyConfig) -> Result<String, EpistemicError> {
        let bytes = canonical_json_bytes(config)?;
        Ok(sha256_hex(&bytes))
    }

    /// Signs `policy_hash`'s UTF-8 hex text (not the raw hash bytes),
    /// matching the format the reference policy tooling signs.
    pub fn sign(&mut self, key: &SigningKey) {
        let signature = key.sign(self.policy_hash.as_bytes());
        self.signature = Some(signature.to_bytes().to_vec());
        self.public_key = Some(key.verifying_key().to_bytes());
    }

    pub fn verify_signature(&self) -> Result<bool, EpistemicError> {
        let (signature_bytes, public_key_bytes) = match (&self.signature, &self.public_key) {
            (Some(s), Some(p)) => (s, p),
            _ => return Ok(false),
        };

        let signature_array: [u8; 64] = signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| EpistemicError::SignatureInvalid("signature is not 64 bytes".into()))?;
        let signature = Signature::from_bytes(&signature_array);

        let verifying_key = VerifyingKey::from_bytes(public_key_bytes)
            .map_err(|e| EpistemicError::SignatureInvalid(format!("invalid public key: {e}")))?;

        Ok(verifying_key.verify(self.policy_hash.as_bytes(), &signature).is_ok())
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, EpistemicError> {
        canonical_json_bytes(&self.config)
    }
}
