//! Membership and non-membership proofs
//!
//! A proof is a path of `(ancestor label, sibling hash)` pairs ordered from
//! the bottom of the path up to the root. Verification folds the path back
//! into a root hash and compares it with a trusted one; it also checks the
//! labels along the path spell out the key (membership) or leave the key
//! unmatched at the frontier (non-membership).

use crate::error::{Error, ProofSource, Result};
use crate::model::{Bits, Domain, Hash, ValueEntry};
use serde::{Deserialize, Serialize};

/// Hash of a leaf: its label and every value stored under it
pub fn leaf_hash(label: &Bits, values: &[ValueEntry]) -> Hash {
    let mut encoded = Vec::with_capacity(values.len() * 40);
    for value in values {
        encoded.extend_from_slice(value.hash.as_bytes());
        encoded.extend_from_slice(&value.position.to_be_bytes());
    }
    Hash::digest_parts(Domain::TrieLeaf, &[label.as_slice(), &encoded])
}

/// Hash of an internal node; a missing child contributes an empty part
pub fn internal_hash(label: &Bits, left: Option<&Hash>, right: Option<&Hash>) -> Hash {
    let left = left.map(|h| h.as_bytes().as_slice()).unwrap_or(&[]);
    let right = right.map(|h| h.as_bytes().as_slice()).unwrap_or(&[]);
    Hash::digest_parts(Domain::TrieInternal, &[label.as_slice(), left, right])
}

/// One ancestor on the path: its label and the hash of the child that is
/// not on the path (absent only for an empty child of the root)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopathEntry {
    pub label: Bits,
    pub sibling: Option<Hash>,
}

/// Proof that a key is present, without its values
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    pub leaf_label: Bits,
    /// First entry is the leaf's parent, last is the root
    pub copath: Vec<CopathEntry>,
}

/// Proof that a key is absent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonMembershipProof {
    /// `None` when the path ends at an empty child of the root
    pub frontier_hash: Option<Hash>,
    /// Label of the node where the key leaves the trie; for an empty child
    /// this is the single expected bit
    pub frontier_label: Bits,
    pub copath: Vec<CopathEntry>,
}

/// Either a membership proof with the leaf's values, or a non-membership proof
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupProof {
    Member {
        proof: MembershipProof,
        values: Vec<ValueEntry>,
    },
    NonMember(NonMembershipProof),
}

impl LookupProof {
    pub fn is_member(&self) -> bool {
        matches!(self, LookupProof::Member { .. })
    }

    /// Leaf values of a membership proof, empty otherwise
    pub fn values(&self) -> &[ValueEntry] {
        match self {
            LookupProof::Member { values, .. } => values,
            LookupProof::NonMember(_) => &[],
        }
    }

    /// Check the proof against a trusted root, whichever kind it is
    pub fn verify(&self, key: &Bits, root: &Hash) -> Result<()> {
        match self {
            LookupProof::Member { proof, values } => proof.verify(key, values, root),
            LookupProof::NonMember(proof) => proof.verify(key, root),
        }
    }
}

/// Concatenation of the ancestor labels from the root down
pub fn path_prefix(copath: &[CopathEntry]) -> Bits {
    let mut prefix = Bits::empty();
    for entry in copath.iter().rev() {
        prefix.extend_from(&entry.label);
    }
    prefix
}

/// Fold a copath into a root hash, starting from the node at the bottom.
///
/// Returns `None` for malformed paths: an empty copath, a non-root ancestor
/// with an empty label or a missing sibling, or a root with a label.
fn fold_copath(start: Option<Hash>, start_label: &Bits, copath: &[CopathEntry]) -> Option<Hash> {
    let last = copath.len().checked_sub(1)?;
    let mut current = start;
    let mut from_left = start_label.first()? == 0;

    for (i, entry) in copath.iter().enumerate() {
        let is_root = i == last;
        if is_root {
            if !entry.label.is_empty() {
                return None;
            }
        } else if entry.sibling.is_none() || entry.label.is_empty() {
            return None;
        }

        let (left, right) = if from_left {
            (current, entry.sibling)
        } else {
            (entry.sibling, current)
        };
        current = Some(internal_hash(&entry.label, left.as_ref(), right.as_ref()));

        if !is_root {
            from_left = entry.label.first()? == 0;
        }
    }
    current
}

impl MembershipProof {
    /// Recompute the root committed to by this proof for `key` holding
    /// `values`, or `None` if the path does not lead to `key`
    pub fn compute_root(&self, key: &Bits, values: &[ValueEntry]) -> Option<Hash> {
        if self.leaf_label.is_empty() {
            return None;
        }
        let mut full = path_prefix(&self.copath);
        full.extend_from(&self.leaf_label);
        if &full != key {
            return None;
        }
        fold_copath(
            Some(leaf_hash(&self.leaf_label, values)),
            &self.leaf_label,
            &self.copath,
        )
    }

    pub fn verify(&self, key: &Bits, values: &[ValueEntry], root: &Hash) -> Result<()> {
        match self.compute_root(key, values) {
            None => Err(Error::invalid(
                ProofSource::Trie,
                "membership path does not spell out the key",
            )),
            Some(computed) if &computed != root => Err(Error::invalid(
                ProofSource::Trie,
                format!(
                    "membership root mismatch: expected {}, computed {}",
                    root.short(),
                    computed.short()
                ),
            )),
            Some(_) => Ok(()),
        }
    }
}

impl NonMembershipProof {
    /// Recompute the root committed to by this proof, or `None` if the
    /// frontier does not show `key` to be absent
    pub fn compute_root(&self, key: &Bits) -> Option<Hash> {
        let prefix = path_prefix(&self.copath);
        if !key.starts_with(prefix.as_slice()) || key.len() <= prefix.len() {
            return None;
        }
        // The frontier must hang on the key's side of its parent
        if key.bit(prefix.len()) != self.frontier_label.first()? {
            return None;
        }
        match self.frontier_hash {
            // An empty slot can only be a child of the root
            None => {
                if self.copath.len() != 1 || self.frontier_label.len() != 1 {
                    return None;
                }
            }
            // A real node whose label the key follows all the way could
            // still hold the key below it
            Some(_) => {
                let rest = key.common_prefix_len(prefix.len(), self.frontier_label.as_slice());
                if rest == self.frontier_label.len() {
                    return None;
                }
            }
        }
        fold_copath(self.frontier_hash, &self.frontier_label, &self.copath)
    }

    pub fn verify(&self, key: &Bits, root: &Hash) -> Result<()> {
        match self.compute_root(key) {
            None => Err(Error::invalid(
                ProofSource::Trie,
                "frontier is not a divergence point of the key",
            )),
            Some(computed) if &computed != root => Err(Error::invalid(
                ProofSource::Trie,
                format!(
                    "non-membership root mismatch: expected {}, computed {}",
                    root.short(),
                    computed.short()
                ),
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_prefix_root_first() {
        let copath = vec![
            CopathEntry {
                label: Bits::parse("01").unwrap(),
                sibling: Some(Hash::digest(b"a")),
            },
            CopathEntry {
                label: Bits::parse("1").unwrap(),
                sibling: Some(Hash::digest(b"b")),
            },
            CopathEntry {
                label: Bits::empty(),
                sibling: None,
            },
        ];
        assert_eq!(path_prefix(&copath).to_string(), "101");
    }

    #[test]
    fn test_fold_rejects_labelled_root() {
        let copath = vec![CopathEntry {
            label: Bits::parse("0").unwrap(),
            sibling: None,
        }];
        let label = Bits::parse("1").unwrap();
        assert!(fold_copath(Some(Hash::digest(b"x")), &label, &copath).is_none());
    }

    #[test]
    fn test_leaf_hash_depends_on_positions() {
        let label = Bits::parse("0").unwrap();
        let h = Hash::digest(b"v");
        assert_ne!(
            leaf_hash(&label, &[ValueEntry::new(h, 0)]),
            leaf_hash(&label, &[ValueEntry::new(h, 1)])
        );
    }
}
