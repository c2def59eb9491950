//! Binary hash tree over ordered leaf digests.
//!
//! Level building combines pairs left to right. When a level has an odd
//! number of nodes the last node is paired with itself (duplicate-last), not
//! with a zero pad. Every anchored root depends on this rule.
//!
//! - zero leaves: root is [`Digest::empty_sentinel`], no levels are kept
//! - one leaf: root is the leaf itself
//! - otherwise: `combine(left, right)` level by level until one node remains

use serde::{Deserialize, Serialize};

use crate::canonical::{combine, Digest};
use crate::error::{CoreError, Result};

/// Side on which a proof sibling sits relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    pub position: Position,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf: Digest,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recombines the leaf with every step and compares against `root`.
    pub fn verify(&self, root: &Digest) -> bool {
        verify_proof(&self.leaf, &self.steps, root)
    }
}

/// Immutable hash tree built once per digest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTree {
    /// `levels[0]` holds the leaves, the last level holds the root.
    levels: Vec<Vec<Digest>>,
    root: Digest,
}

impl HashTree {
    pub fn build(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: Vec::new(),
                root: Digest::empty_sentinel(),
            };
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    [last] => combine(last, last),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        let root = levels[levels.len() - 1][0];
        Self { levels, root }
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn leaves(&self) -> &[Digest] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Level-by-level node arrays, leaves first.
    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }

    /// Builds the inclusion proof for the leaf at `index`.
    pub fn get_proof(&self, index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(CoreError::IndexOutOfRange { index, leaf_count });
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 0 {
                // A lone last node is its own sibling.
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                ProofStep {
                    sibling: *sibling,
                    position: Position::Right,
                }
            } else {
                ProofStep {
                    sibling: level[position - 1],
                    position: Position::Left,
                }
            };
            steps.push(step);
            position /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            leaf: self.levels[0][index],
            steps,
        })
    }
}

/// Convenience: root over `leaves` without keeping the tree.
pub fn compute_root(leaves: &[Digest]) -> Digest {
    HashTree::build(leaves.to_vec()).root()
}

/// Verifies an inclusion proof from the leaf, the ordered steps and the claimed root.
pub fn verify_proof(leaf: &Digest, steps: &[ProofStep], root: &Digest) -> bool {
    let computed = steps.iter().fold(*leaf, |acc, step| match step.position {
        Position::Left => combine(&step.sibling, &acc),
        Position::Right => combine(&acc, &step.sibling),
    });
    computed == *root
}
