//! Append-only, Merkle-chained, Ed25519-signed ledger of algebra
//! operations. A single lock covers sequencing and root recomputation
//! so appends are linearizable; persistence happens before the Merkle
//! tree is extended, so a crash between the two leaves the ledger
//! still consistent with its own backend.

pub mod backend;
pub mod canonical;

use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algebra::NuPair;
use crate::error::EpistemicError;
use crate::guard::monitor::AuditSink;
use crate::merkle::MerkleTree;

pub use backend::{Backend, MemoryBackend};
#[cfg(feature = "sled-backend")]
pub use backend::SledBackend;

/// One entry in the ledger. `signature` is excluded from the hash
/// computation (it signs the hash, so it cannot be part of its own
/// input) and is carried as raw bytes here; persistence layers choose
/// their own wire encoding for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub sequence: u64,
    pub op_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub operation: String,
    pub inputs: Vec<NuPair>,
    pub output: NuPair,
    pub coverage: f64,
    pub invariant_passed: bool,
    #[serde(with = "signature_bytes")]
    pub signature: Vec<u8>,
}

mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Fields hashed to produce a record's content digest. Identical to
/// `LedgerRecord` minus `signature`.
#[derive(Serialize)]
struct HashableRecord<'a> {
    sequence: u64,
    op_id: Uuid,
    parent_id: Option<Uuid>,
    operation: &'a str,
    inputs: &'a [NuPair],
    output: NuPair,
    coverage: f64,
    invariant_passed: bool,
}

impl LedgerRecord {
    /// SHA-256 hex digest of the canonical encoding of every field
    /// except `signature`. This is both the value that gets signed and
    /// the value appended as a Merkle leaf.
    pub fn hash(&self) -> Result<String, EpistemicError> {
        let hashable = HashableRecord {
            sequence: self.sequence,
            op_id: self.op_id,
            parent_id: self.parent_id,
            operation: &self.operation,
            inputs: &self.inputs,
            output: self.output,
            coverage: self.coverage,
            invariant_passed: self.invariant_passed,
        };
        let bytes = canonical::canonical_json_bytes(&hashable)?;
        Ok(canonical::sha256_hex(&bytes))
    }
}

struct LedgerState {
    merkle: MerkleTree,
    next_sequence: u64,
}

/// Construction-time choices for a `Ledger`: the signing key to use,
/// and whether `append` is allowed to fall back to an unverifiable
/// mock signature when no key is configured. Production ledgers should
/// set `allow_mock_signatures` to `false` so a missing key is caught
/// immediately rather than silently producing unsigned records.
pub struct LedgerOptions {
    pub signing_key: Option<SigningKey>,
    pub allow_mock_signatures: bool,
}

impl LedgerOptions {
    /// No signing key, mock signatures permitted. Convenient for tests
    /// and examples that don't care about signature verification.
    pub fn mock() -> Self {
        LedgerOptions { signing_key: None, allow_mock_signatures: true }
    }

    /// No signing key, mock signatures forbidden — `append` fails with
    /// `NoSigningKey` instead of producing an unverifiable record.
    pub fn strict() -> Self {
        LedgerOptions { signing_key: None, allow_mock_signatures: false }
    }

    pub fn signed(signing_key: SigningKey) -> Self {
        LedgerOptions { signing_key: Some(signing_key), allow_mock_signatures: true }
    }
}

/// A signature produced without a real key, so verification can never
/// be claimed for it. Distinct from a real Ed25519 signature by length
/// alone (65 bytes vs. 64), which is enough for `verify_integrity` to
/// never mistake one for the other.
fn mock_signature(digest: &str) -> Vec<u8> {
    format!("mock_sig_{}", &digest[..16.min(digest.len())]).into_bytes()
}

/// Handle to an append-only ledger. Cheap to clone (`Arc` internally);
/// clones share the same backend, lock, and signing key.
pub struct Ledger {
    backend: Arc<dyn Backend>,
    state: Mutex<LedgerState>,
    signing_key: Option<SigningKey>,
    verifying_key: Option<VerifyingKey>,
    allow_mock_signatures: bool,
}

impl Ledger {
    /// Builds a ledger over `backend`, replaying existing records to
    /// rebuild the Merkle tree and the next sequence number.
    pub fn new(backend: Arc<dyn Backend>, options: LedgerOptions) -> Result<Self, EpistemicError> {
        let mut existing = backend.get_all()?;
        existing.sort_by_key(|r| r.sequence);

        let mut merkle = MerkleTree::new();
        let mut next_sequence = 0u64;
        for record in &existing {
            merkle.append(record.hash()?);
            next_sequence = next_sequence.max(record.sequence + 1);
        }

        let verifying_key = options.signing_key.as_ref().map(|k| k.verifying_key());

        Ok(Ledger {
            backend,
            state: Mutex::new(LedgerState {
                merkle,
                next_sequence,
            }),
            signing_key: options.signing_key,
            verifying_key,
            allow_mock_signatures: options.allow_mock_signatures,
        })
    }

    pub fn with_memory_backend(options: LedgerOptions) -> Result<Self, EpistemicError> {
        Ledger::new(Arc::new(MemoryBackend::new()), options)
    }

    pub fn generate_signing_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    /// Appends a new record under `parent_id`, computing its hash,
    /// signing it if a key is configured, persisting it to the
    /// backend, and only then extending the Merkle tree. Returns the
    /// fully-populated, signed record. Fails with `NoSigningKey` if no
    /// key is configured and mock signatures are not permitted.
    pub fn append(
        &self,
        parent_id: Option<Uuid>,
        operation: impl Into<String>,
        inputs: Vec<NuPair>,
        output: NuPair,
        coverage: f64,
        invariant_passed: bool,
    ) -> Result<LedgerRecord, EpistemicError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::LedgerInconsistent("ledger lock poisoned".into()))?;

        let sequence = state.next_sequence;
        let op_id = Uuid::new_v4();

        let mut record = LedgerRecord {
            sequence,
            op_id,
            parent_id,
            operation: operation.into(),
            inputs,
            output,
            coverage,
            invariant_passed,
            signature: Vec::new(),
        };

        let digest = record.hash()?;
        record.signature = match &self.signing_key {
            Some(key) => {
                let hash_bytes = hex::decode(&digest).map_err(|e| {
                    EpistemicError::LedgerInconsistent(format!("digest is not valid hex: {e}"))
                })?;
                key.sign(&hash_bytes).to_bytes().to_vec()
            }
            None if self.allow_mock_signatures => mock_signature(&digest),
            None => return Err(EpistemicError::NoSigningKey),
        };

        self.backend.append(&record)?;
        state.merkle.append(digest);
        state.next_sequence = sequence + 1;

        tracing::info!(op_id = %record.op_id, sequence, operation = %record.operation, "ledger append");
        Ok(record)
    }

    /// Walks `parent_id` links backward from `op_id` to the root of
    /// its chain, then returns the chain in chronological order.
    pub fn trace(&self, op_id: Uuid) -> Result<Vec<LedgerRecord>, EpistemicError> {
        let mut chain = Vec::new();
        let mut current = Some(op_id);
        while let Some(id) = current {
            let record = self
                .backend
                .get_by_id(id)?
                .ok_or_else(|| EpistemicError::LedgerInconsistent(format!("missing record {id}")))?;
            current = record.parent_id;
            chain.push(record);
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn root(&self) -> Result<String, EpistemicError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::LedgerInconsistent("ledger lock poisoned".into()))?;
        Ok(state.merkle.root())
    }

    pub fn get_all(&self) -> Result<Vec<LedgerRecord>, EpistemicError> {
        let mut records = self.backend.get_all()?;
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    pub fn get_by_id(&self, op_id: Uuid) -> Result<Option<LedgerRecord>, EpistemicError> {
        self.backend.get_by_id(op_id)
    }

    pub fn len(&self) -> Result<usize, EpistemicError> {
        Ok(self.get_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, EpistemicError> {
        Ok(self.len()? == 0)
    }

    /// Recomputes a fresh Merkle tree from every stored record's hash
    /// and compares it against the live cached root; also checks that
    /// sequence numbers are strictly monotonic and, when a verifying
    /// key is configured, that every signature is valid.
    pub fn verify_integrity(&self) -> Result<(), EpistemicError> {
        let records = self.get_all()?;

        for window in records.windows(2) {
            if window[1].sequence <= window[0].sequence {
                return Err(EpistemicError::LedgerInconsistent(format!(
                    "sequence {} does not follow {}",
                    window[1].sequence, window[0].sequence
                )));
            }
        }

        let mut fresh = MerkleTree::new();
        for record in &records {
            fresh.append(record.hash()?);

            if let Some(verifying_key) = &self.verifying_key {
                if record.signature.is_empty() {
                    return Err(EpistemicError::SignatureInvalid(format!(
                        "record {} has no signature",
                        record.op_id
                    )));
                }
                let digest = record.hash()?;
                let hash_bytes = hex::decode(&digest).map_err(|e| {
                    EpistemicError::LedgerInconsistent(format!("digest is not valid hex: {e}"))
                })?;
                let signature_bytes: [u8; 64] = record.signature.as_slice().try_into().map_err(|_| {
                    EpistemicError::SignatureInvalid(format!(
                        "record {} signature is not 64 bytes",
                        record.op_id
                    ))
                })?;
                let signature = Signature::from_bytes(&signature_bytes);
                verifying_key
                    .verify(&hash_bytes, &signature)
                    .map_err(|e| {
                        EpistemicError::SignatureInvalid(format!(
                            "record {} signature verification failed: {e}",
                            record.op_id
                        ))
                    })?;
            }
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::LedgerInconsistent("ledger lock poisoned".into()))?;
        let live_root = state.merkle.root();
        let fresh_root = fresh.root();
        if live_root != fresh_root {
            return Err(EpistemicError::LedgerInconsistent(format!(
                "live root {live_root} does not match recomputed root {fresh_root}"
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.verify_integrity().is_ok()
    }
}

impl AuditSink for Ledger {
    fn record(
        &self,
        parent_id: Option<Uuid>,
        operation: &str,
        inputs: &[NuPair],
        output: NuPair,
        coverage: f64,
        invariant_passed: bool,
    ) -> Result<LedgerRecord, EpistemicError> {
        self.append(
            parent_id,
            operation,
            inputs.to_vec(),
            output,
            coverage,
            invariant_passed,
        )
    }
}
