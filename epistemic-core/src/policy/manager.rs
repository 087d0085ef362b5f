use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::error::EpistemicError;
use crate::policy::{Policy, PolicyConfig};

/// Summary of a policy retained in `PolicyManager`'s in-memory history,
/// without the full rule set.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyHistoryEntry {
    pub version: String,
    pub name: String,
    pub policy_hash: String,
    pub metadata: std::collections::HashMap<String, Value>,
}

/// Loads, saves, and tracks the history of policy documents stored as
/// JSON files under a directory. One file per named policy.
pub struct PolicyManager {
    directory: PathBuf,
    current: Mutex<Option<Policy>>,
    history: Mutex<Vec<PolicyHistoryEntry>>,
}

impl PolicyManager {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        PolicyManager {
            directory: directory.into(),
            current: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.json"))
    }

    pub fn create_policy(
        &self,
        name: &str,
        description: &str,
        rules: Vec<Value>,
        halt_on_critical: bool,
        auto_log: bool,
        metadata: std::collections::HashMap<String, Value>,
    ) -> Result<Policy, EpistemicError> {
        let config = PolicyConfig {
            version: "1.0.0".into(),
            name: name.to_string(),
            description: description.to_string(),
            rules,
            escalation: crate::policy::Escalation { halt_on_critical, auto_log },
            metadata,
        };
        Policy::new(config)
    }

    pub fn save_policy(&self, policy: &Policy, name: &str) -> Result<(), EpistemicError> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| EpistemicError::BackendFailure(format!("create policy dir failed: {e}")))?;
        let json = serde_json::to_string_pretty(policy)
            .map_err(|e| EpistemicError::BackendFailure(format!("encode policy failed: {e}")))?;
        fs::write(self.path_for(name), json)
            .map_err(|e| EpistemicError::BackendFailure(format!("write policy failed: {e}")))?;

        self.push_history(policy);
        *self.current.lock().expect("policy manager lock poisoned") = Some(policy.clone());
        Ok(())
    }

    pub fn load_policy(&self, name: &str) -> Result<Policy, EpistemicError> {
        let bytes = fs::read(self.path_for(name))
            .map_err(|e| EpistemicError::BackendFailure(format!("read policy failed: {e}")))?;
        let policy: Policy = serde_json::from_slice(&bytes)
            .map_err(|e| EpistemicError::BackendFailure(format!("decode policy failed: {e}")))?;

        self.push_history(&policy);
        *self.current.lock().expect("policy manager lock poisoned") = Some(policy.clone());
        Ok(policy)
    }

    pub fn list_policies(&self) -> Result<Vec<String>, EpistemicError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| EpistemicError::BackendFailure(format!("list policies failed: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| EpistemicError::BackendFailure(format!("list policies failed: {e}")))?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn get_history(&self) -> Vec<PolicyHistoryEntry> {
        self.history.lock().expect("policy manager lock poisoned").clone()
    }

    pub fn current_policy(&self) -> Option<Policy> {
        self.current.lock().expect("policy manager lock poisoned").clone()
    }

    fn push_history(&self, policy: &Policy) {
        let entry = PolicyHistoryEntry {
            version: policy.config.version.clone(),
            name: policy.config.name.clone(),
            policy_hash: policy.policy_hash.clone(),
            metadata: policy.config.metadata.clone(),
        };
        self.history.lock().expect("policy manager lock poisoned").push(entry);
    }
}
