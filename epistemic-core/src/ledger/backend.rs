//! Storage abstraction for ledger records. The kernel ships an
//! in-memory backend unconditionally and an optional embedded-KV
//! backend for local persistence; anything beyond that (networked
//! databases, driver selection) is the caller's concern.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::EpistemicError;
use crate::ledger::LedgerRecord;

/// Object-safe persistence contract for `Ledger`. Implementations must
/// be safe to share across threads behind an `Arc`.
pub trait Backend: Send + Sync {
    fn append(&self, record: &LedgerRecord) -> Result<(), EpistemicError>;
    fn get_by_id(&self, op_id: Uuid) -> Result<Option<LedgerRecord>, EpistemicError>;
    fn get_all(&self) -> Result<Vec<LedgerRecord>, EpistemicError>;
}

/// Simple in-process backend: a `Vec` in insertion order plus an
/// id index. Records are never mutated or removed after append.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    records: Vec<LedgerRecord>,
    index: HashMap<Uuid, usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }
}

impl Backend for MemoryBackend {
    fn append(&self, record: &LedgerRecord) -> Result<(), EpistemicError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::BackendFailure("memory backend lock poisoned".into()))?;
        let position = state.records.len();
        state.index.insert(record.op_id, position);
        state.records.push(record.clone());
        Ok(())
    }

    fn get_by_id(&self, op_id: Uuid) -> Result<Option<LedgerRecord>, EpistemicError> {
        let state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::BackendFailure("memory backend lock poisoned".into()))?;
        Ok(state
            .index
            .get(&op_id)
            .map(|&position| state.records[position].clone()))
    }

    fn get_all(&self) -> Result<Vec<LedgerRecord>, EpistemicError> {
        let state = self
            .state
            .lock()
            .map_err(|_| EpistemicError::BackendFailure("memory backend lock poisoned".into()))?;
        Ok(state.records.clone())
    }
}

/// Embedded-KV backend for local, single-process durability, mirroring
/// the "local file DB" mentioned for this module without pulling in a
/// networked database driver.
#[cfg(feature = "sled-backend")]
pub struct SledBackend {
    tree: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledBackend {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, EpistemicError> {
        let tree = sled::open(path)
            .map_err(|e| EpistemicError::BackendFailure(format!("sled open failed: {e}")))?;
        Ok(SledBackend { tree })
    }
}

#[cfg(feature = "sled-backend")]
impl Backend for SledBackend {
    fn append(&self, record: &LedgerRecord) -> Result<(), EpistemicError> {
        let key = record.op_id.as_bytes();
        let value = serde_json::to_vec(record)
            .map_err(|e| EpistemicError::BackendFailure(format!("encode failed: {e}")))?;
        self.tree
            .insert(key, value)
            .map_err(|e| EpistemicError::BackendFailure(format!("sled insert failed: {e}")))?;
        self.tree
            .flush()
            .map_err(|e| EpistemicError::BackendFailure(format!("sled flush failed: {e}")))?;
        Ok(())
    }

    fn get_by_id(&self, op_id: Uuid) -> Result<Option<LedgerRecord>, EpistemicError> {
        match self
            .tree
            .get(op_id.as_bytes())
            .map_err(|e| EpistemicError::BackendFailure(format!("sled get failed: {e}")))?
        {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| EpistemicError::BackendFailure(format!("decode failed: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn get_all(&self) -> Result<Vec<LedgerRecord>, EpistemicError> {
        let mut records = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) =
                entry.map_err(|e| EpistemicError::BackendFailure(format!("sled scan failed: {e}")))?;
            let record = serde_json::from_slice(&bytes)
                .map_err(|e| EpistemicError::BackendFailure(format!("decode failed: {e}")))?;
            records.push(record);
        }
        records.sort_by_key(|r: &LedgerRecord| r.sequence);
        Ok(records)
    }
}
