//! Append-only Merkle chain over hex-digest leaves. Internal node
//! hashes are computed over the ASCII concatenation of child hex
//! digests, not raw bytes, so roots match an existing deployed chain
//! built the same way.

use sha2::{Digest as _, Sha256};

use crate::error::EpistemicError;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Which side of its parent a node sits on, needed to fold a proof
/// path in the right order during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Inclusion proof for one leaf: the leaf's own hash plus the sibling
/// hash and side at every level from the leaf up to the root.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: String,
    pub siblings: Vec<(String, Side)>,
    pub root: String,
}

impl MerkleProof {
    /// Recomputes the root by folding `leaf_hash` with each sibling in
    /// order and compares it to `self.root`.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf_hash.clone();
        for (sibling, side) in &self.siblings {
            let combined = match side {
                Side::Left => format!("{sibling}{current}"),
                Side::Right => format!("{current}{sibling}"),
            };
            current = sha256_hex(combined.as_bytes());
        }
        current == self.root
    }
}

/// Append-only Merkle tree. Leaves are not padded to a power of two;
/// `len()` always reports the true leaf count. The root is cached and
/// invalidated on every append.
#[derive(Debug, Default, Clone)]
pub struct MerkleTree {
    leaves: Vec<String>,
    cached_root: Option<String>,
}

impl MerkleTree {
    pub fn new() -> Self {
        MerkleTree {
            leaves: Vec::new(),
            cached_root: None,
        }
    }

    pub fn from_leaves(leaves: Vec<String>) -> Self {
        MerkleTree {
            leaves,
            cached_root: None,
        }
    }

    pub fn append(&mut self, leaf_hash: String) {
        self.leaves.push(leaf_hash);
        self.cached_root = None;
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// The empty tree's root is the SHA-256 hex digest of the empty
    /// byte string; a single-leaf tree's root is that leaf itself.
    pub fn root(&mut self) -> String {
        if let Some(root) = &self.cached_root {
            return root.clone();
        }
        let root = Self::compute_root(&self.leaves);
        self.cached_root = Some(root.clone());
        root
    }

    fn compute_root(leaves: &[String]) -> String {
        if leaves.is_empty() {
            return sha256_hex(b"");
        }
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            level = Self::fold_level(&level);
        }
        level.into_iter().next().unwrap()
    }

    fn fold_level(level: &[String]) -> Vec<String> {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            let left = &level[i];
            let right = if i + 1 < level.len() {
                &level[i + 1]
            } else {
                left
            };
            next.push(sha256_hex(format!("{left}{right}").as_bytes()));
            i += 2;
        }
        next
    }

    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof, EpistemicError> {
        if leaf_index >= self.leaves.len() {
            return Err(EpistemicError::MerkleIndexOutOfRange {
                index: leaf_index,
                len: self.leaves.len(),
            });
        }

        let mut siblings = Vec::new();
        let mut level = self.leaves.clone();
        let mut index = leaf_index;

        while level.len() > 1 {
            let pair_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            let sibling = if pair_index < level.len() {
                level[pair_index].clone()
            } else {
                level[index].clone()
            };
            let side = if index % 2 == 0 { Side::Right } else { Side::Left };
            siblings.push((sibling, side));

            level = Self::fold_level(&level);
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_index,
            leaf_hash: self.leaves[leaf_index].clone(),
            siblings,
            root: level.into_iter().next().unwrap_or_else(|| sha256_hex(b"")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_root_is_hash_of_empty_string() {
        let mut tree = MerkleTree::new();
        assert_eq!(tree.root(), sha256_hex(b""));
    }

    #[test]
    fn single_leaf_tree_root_is_the_leaf() {
        let mut tree = MerkleTree::new();
        tree.append(sha256_hex(b"a"));
        assert_eq!(tree.root(), sha256_hex(b"a"));
    }

    #[test]
    fn append_invalidates_cached_root() {
        let mut tree = MerkleTree::new();
        tree.append(sha256_hex(b"a"));
        let first = tree.root();
        tree.append(sha256_hex(b"b"));
        assert_ne!(tree.root(), first);
    }

    #[test]
    fn proof_verifies_for_every_leaf_across_odd_and_even_counts() {
        for count in 1..=9 {
            let mut tree = MerkleTree::new();
            for i in 0..count {
                tree.append(sha256_hex(format!("leaf-{i}").as_bytes()));
            }
            let root = tree.root();
            for i in 0..count {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.root, root);
                assert!(proof.verify(), "proof for leaf {i} of {count} failed");
            }
        }
    }

    #[test]
    fn tampered_proof_fails_verification() {
        let mut tree = MerkleTree::new();
        for i in 0..5 {
            tree.append(sha256_hex(format!("leaf-{i}").as_bytes()));
        }
        let mut proof = tree.proof(2).unwrap();
        proof.leaf_hash = sha256_hex(b"tampered");
        assert!(!proof.verify());
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut tree = MerkleTree::new();
        tree.append(sha256_hex(b"a"));
        let err = tree.proof(5).unwrap_err();
        matches!(err, EpistemicError::MerkleIndexOutOfRange { index: 5, len: 1 });
    }

    #[test]
    fn leaves_are_not_padded() {
        let mut tree = MerkleTree::new();
        for i in 0..3 {
            tree.append(sha256_hex(format!("leaf-{i}").as_bytes()));
        }
        assert_eq!(tree.len(), 3);
    }
}
