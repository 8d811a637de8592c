//! Trie node types

use super::proof::{internal_hash, leaf_hash};
use crate::model::{Bits, Hash, ValueEntry};
use serde::{Deserialize, Serialize};

/// A node in the compressed binary trie
///
/// Every node carries the run of key bits it consumes. A child hangs on the
/// left of its parent when its label starts with `0` and on the right
/// otherwise. Hashes are kept up to date on every mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TrieNode {
    /// A branch with up to two children
    Internal {
        label: Bits,
        left: Option<Box<TrieNode>>,
        right: Option<Box<TrieNode>>,
        hash: Hash,
    },
    /// The end of a key, holding its values in append order
    Leaf {
        label: Bits,
        values: Vec<ValueEntry>,
        hash: Hash,
    },
}

impl TrieNode {
    /// Create a leaf node
    pub fn leaf(label: Bits, values: Vec<ValueEntry>) -> Self {
        let hash = leaf_hash(&label, &values);
        TrieNode::Leaf { label, values, hash }
    }

    /// Create an internal node
    pub fn internal(label: Bits, left: Option<Box<TrieNode>>, right: Option<Box<TrieNode>>) -> Self {
        let hash = internal_hash(
            &label,
            left.as_deref().map(TrieNode::hash_ref),
            right.as_deref().map(TrieNode::hash_ref),
        );
        TrieNode::Internal {
            label,
            left,
            right,
            hash,
        }
    }

    pub fn label(&self) -> &Bits {
        match self {
            TrieNode::Internal { label, .. } | TrieNode::Leaf { label, .. } => label,
        }
    }

    pub fn hash(&self) -> Hash {
        *self.hash_ref()
    }

    fn hash_ref(&self) -> &Hash {
        match self {
            TrieNode::Internal { hash, .. } | TrieNode::Leaf { hash, .. } => hash,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TrieNode::Leaf { .. })
    }

    /// Values stored at this node; empty for internal nodes
    pub fn values(&self) -> &[ValueEntry] {
        match self {
            TrieNode::Leaf { values, .. } => values,
            TrieNode::Internal { .. } => &[],
        }
    }

    /// Child on the given side, if this is an internal node
    pub fn child(&self, bit: u8) -> Option<&TrieNode> {
        match self {
            TrieNode::Internal { left, right, .. } => {
                if bit == 0 {
                    left.as_deref()
                } else {
                    right.as_deref()
                }
            }
            TrieNode::Leaf { .. } => None,
        }
    }

    /// Mutable slot for the child on the given side; `None` for leaves
    pub(crate) fn child_slot(&mut self, bit: u8) -> Option<&mut Option<Box<TrieNode>>> {
        match self {
            TrieNode::Internal { left, right, .. } => Some(if bit == 0 { left } else { right }),
            TrieNode::Leaf { .. } => None,
        }
    }

    pub(crate) fn set_label(&mut self, new_label: Bits) {
        match self {
            TrieNode::Internal { label, .. } | TrieNode::Leaf { label, .. } => *label = new_label,
        }
        self.rehash();
    }

    /// Recompute this node's hash from its label and children or values
    pub(crate) fn rehash(&mut self) {
        match self {
            TrieNode::Internal {
                label,
                left,
                right,
                hash,
            } => {
                *hash = internal_hash(
                    label,
                    left.as_deref().map(TrieNode::hash_ref),
                    right.as_deref().map(TrieNode::hash_ref),
                );
            }
            TrieNode::Leaf {
                label,
                values,
                hash,
            } => {
                *hash = leaf_hash(label, values);
            }
        }
    }
}
