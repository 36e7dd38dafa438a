//! Merkle tree for batch anchoring and inclusion proofs
//!
//! # Design
//!
//! - Leaves are record `current_hash` values, in the order given (the ledger
//!   passes chain order)
//! - Internal node = `SHA-256(hex(left) || hex(right))` over the ASCII hex text
//! - A level with an odd count pairs its last node with itself
//! - An empty batch has the root `SHA-256("empty")`; a single leaf is its own root
//! - All levels are kept, so proofs are O(log n) lookups

use crate::crypto::{empty_batch_root, Digest};
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Hash a pair of nodes (used for internal nodes)
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.to_hex().as_bytes());
    hasher.update(right.to_hex().as_bytes());
    Digest::from_bytes(hasher.finalize().into())
}

/// Side on which the sibling sits relative to the running hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

/// Merkle inclusion proof (path from leaf to root)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Position of the proven leaf in the batch
    pub leaf_index: usize,
    /// Sibling hashes, bottom-up
    pub siblings: Vec<Digest>,
    /// Side of each sibling, aligned with `siblings`
    pub directions: Vec<Direction>,
    /// Root the proof folds to
    pub root: Digest,
}

impl MerkleProof {
    /// Fold the siblings onto `leaf_hash` and compare with the root
    pub fn verify(&self, leaf_hash: &Digest) -> bool {
        verify_proof(leaf_hash, self)
    }
}

/// Fold `proof`'s siblings onto `leaf_hash` and compare with `proof.root`
pub fn verify_proof(leaf_hash: &Digest, proof: &MerkleProof) -> bool {
    if proof.siblings.len() != proof.directions.len() {
        return false;
    }

    let folded = proof
        .siblings
        .iter()
        .zip(&proof.directions)
        .fold(*leaf_hash, |current, (sibling, direction)| match direction {
            Direction::Left => hash_pair(sibling, &current),
            Direction::Right => hash_pair(&current, sibling),
        });

    folded == proof.root
}

/// Fully materialized Merkle tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` are the leaves, the last level holds the root alone
    levels: Vec<Vec<Digest>>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Build the tree over leaf hashes
    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: vec![vec![empty_batch_root()]],
                leaf_count: 0,
            };
        }

        let leaf_count = leaves.len();
        let mut levels = vec![leaves];

        loop {
            let current_level = &levels[levels.len() - 1];
            if current_level.len() <= 1 {
                break;
            }

            let next_level: Vec<Digest> = current_level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    // Odd count: pair the last node with itself
                    [last] => hash_pair(last, last),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next_level);
        }

        Self { levels, leaf_count }
    }

    /// Build the tree over the records' `current_hash`, in the given order
    pub fn from_records(records: &[Record]) -> Self {
        Self::from_leaves(records.iter().map(|r| r.current_hash).collect())
    }

    /// Root hash
    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_batch_root)
    }

    /// All levels, leaves first (the empty batch has the single level `[SHA-256("empty")]`)
    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    /// Whether the tree was built from no leaves
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Generate the inclusion proof for the leaf at `leaf_index`
    pub fn proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.leaf_count {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.levels.len());
        let mut directions = Vec::with_capacity(self.levels.len());
        let mut index = leaf_index;

        // Walk up the tree, collecting siblings (the root level has none)
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_index, direction) = if index % 2 == 0 {
                // Last node of an odd level is its own sibling
                ((index + 1).min(level.len() - 1), Direction::Right)
            } else {
                (index - 1, Direction::Left)
            };

            siblings.push(level[sibling_index]);
            directions.push(direction);
            index /= 2;
        }

        Some(MerkleProof {
            leaf_index,
            siblings,
            directions,
            root: self.root(),
        })
    }
}

/// Build the tree over `records` in the given order
pub fn build_tree(records: &[Record]) -> MerkleTree {
    MerkleTree::from_records(records)
}

/// Inclusion proof for `target_id` within `records`, or `None` when absent
pub fn proof_for(records: &[Record], target_id: &RecordId) -> Option<MerkleProof> {
    let leaf_index = records.iter().position(|r| &r.id == target_id)?;
    build_tree(records).proof(leaf_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n)
            .map(|i| hash_bytes(format!("leaf{}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_leaves(vec![]);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.root(), empty_batch_root());
        assert!(tree.proof(0).is_none());
    }

    #[test]
    fn test_single_leaf() {
        let leaves = leaves(1);
        let tree = MerkleTree::from_leaves(leaves.clone());
        assert!(!tree.is_empty());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root(), leaves[0]);

        let proof = tree.proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_proof(&leaves[0], &proof));
    }

    #[test]
    fn test_two_leaves() {
        let leaves = leaves(2);
        let tree = MerkleTree::from_leaves(leaves.clone());
        assert_eq!(tree.root(), hash_pair(&leaves[0], &leaves[1]));
    }

    #[test]
    fn test_pair_hash_is_over_hex_text() {
        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        let expected = hash_bytes(format!("{}{}", a.to_hex(), b.to_hex()).as_bytes());
        assert_eq!(hash_pair(&a, &b), expected);
    }

    #[test]
    fn test_four_leaves() {
        let leaves = leaves(4);
        let tree = MerkleTree::from_leaves(leaves.clone());

        let h01 = hash_pair(&leaves[0], &leaves[1]);
        let h23 = hash_pair(&leaves[2], &leaves[3]);
        assert_eq!(tree.root(), hash_pair(&h01, &h23));
        assert_eq!(tree.levels().len(), 3);
    }

    #[test]
    fn test_odd_number_leaves() {
        let leaves = leaves(3);
        let tree = MerkleTree::from_leaves(leaves.clone());

        // With odd number, last leaf is paired with itself
        let h01 = hash_pair(&leaves[0], &leaves[1]);
        let h22 = hash_pair(&leaves[2], &leaves[2]);
        assert_eq!(tree.root(), hash_pair(&h01, &h22));
    }

    #[test]
    fn test_proof_two_leaves_directions() {
        let leaves = leaves(2);
        let tree = MerkleTree::from_leaves(leaves.clone());

        let proof0 = tree.proof(0).unwrap();
        assert_eq!(proof0.siblings, vec![leaves[1]]);
        assert_eq!(proof0.directions, vec![Direction::Right]);

        let proof1 = tree.proof(1).unwrap();
        assert_eq!(proof1.siblings, vec![leaves[0]]);
        assert_eq!(proof1.directions, vec![Direction::Left]);
    }

    #[test]
    fn test_every_leaf_proves() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let tree = MerkleTree::from_leaves(leaves.clone());
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify_proof(leaf, &proof), "leaf {} of {}", i, n);
            }
        }
    }

    #[test]
    fn test_odd_tail_proof_uses_itself() {
        let leaves = leaves(3);
        let tree = MerkleTree::from_leaves(leaves.clone());
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.siblings[0], leaves[2]);
        assert_eq!(proof.directions[0], Direction::Right);
    }

    #[test]
    fn test_tampered_proof_fails() {
        let leaves = leaves(5);
        let tree = MerkleTree::from_leaves(leaves.clone());
        let proof = tree.proof(3).unwrap();

        let mut bad_sibling = proof.clone();
        bad_sibling.siblings[1] = hash_bytes(b"forged");
        assert!(!verify_proof(&leaves[3], &bad_sibling));

        let mut bad_root = proof.clone();
        bad_root.root = hash_bytes(b"fake_root");
        assert!(!verify_proof(&leaves[3], &bad_root));

        let mut truncated = proof.clone();
        truncated.directions.pop();
        assert!(!verify_proof(&leaves[3], &truncated));

        assert!(!verify_proof(&leaves[2], &proof));
    }

    #[test]
    fn test_out_of_range_proof() {
        let tree = MerkleTree::from_leaves(leaves(3));
        assert!(tree.proof(3).is_none());
    }
}
