//! Canonical encoding shared by the ledger and policy layers: JSON with
//! lexicographically sorted keys, no insignificant whitespace, so the
//! same logical document always hashes to the same bytes regardless of
//! field insertion order.

use serde::Serialize;

use crate::error::EpistemicError;

/// Serializes `value` to canonical JSON bytes. Relies on
/// `serde_json::Value`'s map representation being a `BTreeMap`, which
/// sorts keys by construction as long as the `preserve_order` feature
/// is not enabled.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EpistemicError> {
    let as_value = serde_json::to_value(value)
        .map_err(|e| EpistemicError::LedgerInconsistent(format!("canonicalization failed: {e}")))?;
    serde_json::to_vec(&as_value)
        .map_err(|e| EpistemicError::LedgerInconsistent(format!("canonicalization failed: {e}")))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    crate::merkle::sha256_hex(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_encoding() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            canonical_json_bytes(&a).unwrap(),
            canonical_json_bytes(&b).unwrap()
        );
    }
}
