//! Key lookups and proof generation shared by both trie kinds

use super::proof::{CopathEntry, LookupProof, MembershipProof, NonMembershipProof};
use crate::error::{Error, Result};
use crate::model::{Bits, Hash, ValueEntry};

/// Read access to a trie's nodes, however they are stored
pub(crate) trait TrieView {
    type Id: Copy + PartialEq;

    fn root(&self) -> Result<Self::Id>;
    fn label(&self, id: Self::Id) -> &Bits;
    fn hash(&self, id: Self::Id) -> Hash;
    /// `[left, right]` for an internal node, `None` for a leaf
    fn children(&self, id: Self::Id) -> Option<[Option<Self::Id>; 2]>;
    fn values(&self, id: Self::Id) -> &[ValueEntry];

    /// Called on every node the walk enters
    fn visit(&self, _id: Self::Id) -> Result<()> {
        Ok(())
    }
}

/// Where a walk for a key ended
pub(crate) enum Walk<Id> {
    /// Root to the key's leaf
    Found(Vec<Id>),
    /// Root to an internal node whose child on `bit` is empty
    Missing { path: Vec<Id>, bit: u8 },
    /// Root to the first node whose label the key leaves
    Diverged(Vec<Id>),
}

pub(crate) fn walk<V: TrieView>(view: &V, key: &Bits) -> Result<Walk<V::Id>> {
    let root = view.root()?;
    view.visit(root)?;
    let mut path = vec![root];
    let mut depth = view.label(root).len();

    loop {
        let current = path[path.len() - 1];
        let children = match view.children(current) {
            Some(children) => children,
            None if depth == key.len() => return Ok(Walk::Found(path)),
            None => {
                return Err(Error::StructuralInvariant(format!(
                    "leaf reached after {} of {} key bits",
                    depth,
                    key.len()
                )))
            }
        };
        if depth >= key.len() {
            return Err(Error::StructuralInvariant(
                "key exhausted at an internal node".into(),
            ));
        }

        let bit = key.bit(depth);
        let child = match children[bit as usize] {
            Some(child) => child,
            None => return Ok(Walk::Missing { path, bit }),
        };
        view.visit(child)?;
        path.push(child);

        let label = view.label(child);
        if key.common_prefix_len(depth, label.as_slice()) < label.len() {
            return Ok(Walk::Diverged(path));
        }
        depth += label.len();
    }
}

/// Sibling path from the bottom of `path` up to the root
pub(crate) fn copath<V: TrieView>(view: &V, path: &[V::Id]) -> Vec<CopathEntry> {
    let mut entries = Vec::with_capacity(path.len());
    for pair in path.windows(2).rev() {
        let (parent, child) = (pair[0], pair[1]);
        let sibling = view.children(parent).and_then(|[left, right]| {
            if left == Some(child) {
                right
            } else {
                left
            }
        });
        entries.push(CopathEntry {
            label: view.label(parent).clone(),
            sibling: sibling.map(|id| view.hash(id)),
        });
    }
    entries
}

pub(crate) fn prove<V: TrieView>(view: &V, key: &Bits) -> Result<LookupProof> {
    match walk(view, key)? {
        Walk::Found(path) => {
            let leaf = path[path.len() - 1];
            Ok(LookupProof::Member {
                proof: MembershipProof {
                    leaf_label: view.label(leaf).clone(),
                    copath: copath(view, &path),
                },
                values: view.values(leaf).to_vec(),
            })
        }
        Walk::Missing { path, bit } => {
            if path.len() != 1 {
                return Err(Error::StructuralInvariant(
                    "only the root may have an empty child".into(),
                ));
            }
            let root = path[0];
            let sibling = view
                .children(root)
                .and_then(|children| children[1 - bit as usize]);
            Ok(LookupProof::NonMember(NonMembershipProof {
                frontier_hash: None,
                frontier_label: Bits::from_bits(&[bit]),
                copath: vec![CopathEntry {
                    label: view.label(root).clone(),
                    sibling: sibling.map(|id| view.hash(id)),
                }],
            }))
        }
        Walk::Diverged(path) => {
            let frontier = path[path.len() - 1];
            Ok(LookupProof::NonMember(NonMembershipProof {
                frontier_hash: Some(view.hash(frontier)),
                frontier_label: view.label(frontier).clone(),
                copath: copath(view, &path),
            }))
        }
    }
}
