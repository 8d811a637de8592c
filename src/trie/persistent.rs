//! Versioned trie with path copying
//!
//! All node versions live in one arena and refer to each other by
//! [`NodeId`]. Each epoch has its own root. A node created in an earlier
//! epoch is never modified; writing to it makes a copy tagged with the
//! current epoch and links the two versions through `prev`/`next`.

use super::proof::{internal_hash, leaf_hash, LookupProof};
use super::walk::{self, TrieView};
use crate::error::{Error, Result};
use crate::model::{Bits, Hash, ValueEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Index of a node version in the arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum VersionedKind {
    Internal {
        left: Option<NodeId>,
        right: Option<NodeId>,
    },
    Leaf {
        values: Vec<ValueEntry>,
    },
}

/// One version of a node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionedNode {
    pub label: Bits,
    pub kind: VersionedKind,
    pub hash: Hash,
    /// Epoch this version was created in
    pub epoch: u64,
    /// Version this one was copied from
    pub prev: Option<NodeId>,
    /// Version copied from this one
    pub next: Option<NodeId>,
    /// Parent when this version was created or last written
    pub parent: Option<NodeId>,
}

impl VersionedNode {
    fn child(&self, bit: u8) -> Option<NodeId> {
        match self.kind {
            VersionedKind::Internal { left, right } => {
                if bit == 0 {
                    left
                } else {
                    right
                }
            }
            VersionedKind::Leaf { .. } => None,
        }
    }
}

/// A trie whose past epochs stay readable after later inserts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistentTrie {
    nodes: Vec<VersionedNode>,
    /// Root of every completed epoch
    roots: Vec<NodeId>,
    /// Key count of every completed epoch
    sizes: Vec<u64>,
    current_root: NodeId,
    epoch: u64,
    size: u64,
    key_len: Option<usize>,
}

impl Default for PersistentTrie {
    fn default() -> Self {
        PersistentTrie::new()
    }
}

impl PersistentTrie {
    pub fn new() -> Self {
        let label = Bits::empty();
        let root = VersionedNode {
            hash: internal_hash(&label, None, None),
            label,
            kind: VersionedKind::Internal {
                left: None,
                right: None,
            },
            epoch: 0,
            prev: None,
            next: None,
            parent: None,
        };
        PersistentTrie {
            nodes: vec![root],
            roots: Vec::new(),
            sizes: Vec::new(),
            current_root: NodeId(0),
            epoch: 0,
            size: 0,
            key_len: None,
        }
    }

    pub fn with_key_len(key_len: usize) -> Self {
        PersistentTrie {
            key_len: Some(key_len),
            ..PersistentTrie::new()
        }
    }

    /// The epoch currently accepting inserts
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total node versions in the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&VersionedNode> {
        self.nodes.get(id.index())
    }

    /// Close the current epoch; its root becomes immutable
    pub fn next_epoch(&mut self) {
        self.roots.push(self.current_root);
        self.sizes.push(self.size);
        self.epoch += 1;
        debug!(epoch = self.epoch, keys = self.size, "base trie advanced");
    }

    pub fn root_at(&self, epoch: u64) -> Result<NodeId> {
        if epoch > self.epoch {
            return Err(Error::EpochNotYetOccurred {
                requested: epoch,
                current: self.epoch,
            });
        }
        if epoch == self.epoch {
            return Ok(self.current_root);
        }
        Ok(self.roots[epoch as usize])
    }

    pub fn root_hash(&self, epoch: u64) -> Result<Hash> {
        let root = self.root_at(epoch)?;
        Ok(self.nodes[root.index()].hash)
    }

    /// Number of distinct keys present at `epoch`
    pub fn size_at(&self, epoch: u64) -> Result<u64> {
        if epoch > self.epoch {
            return Err(Error::EpochNotYetOccurred {
                requested: epoch,
                current: self.epoch,
            });
        }
        if epoch == self.epoch {
            return Ok(self.size);
        }
        Ok(self.sizes[epoch as usize])
    }

    fn check_key(&self, key: &Bits) -> Result<()> {
        match self.key_len {
            Some(expected) if expected != key.len() => Err(Error::KeyLength {
                expected,
                found: key.len(),
            }),
            _ if key.is_empty() => Err(Error::KeyLength {
                expected: 1,
                found: 0,
            }),
            _ => Ok(()),
        }
    }

    /// Append `entry` under `key` in the current epoch
    pub fn insert(&mut self, key: &Bits, entry: ValueEntry) -> Result<()> {
        self.check_key(key)?;
        self.key_len.get_or_insert(key.len());

        let root = self.writable(self.current_root, None)?;
        self.current_root = root;
        if self.insert_below(root, key, 0, entry)? {
            self.size += 1;
        }
        Ok(())
    }

    /// Values under `key` as of `epoch`
    pub fn lookup(&self, key: &Bits, epoch: u64) -> Result<Option<&[ValueEntry]>> {
        self.check_key(key)?;
        match walk::walk(&self.view(epoch)?, key)? {
            walk::Walk::Found(mut path) => Ok(path.pop().map(|leaf| self.leaf_values(leaf))),
            walk::Walk::Missing { .. } | walk::Walk::Diverged(_) => Ok(None),
        }
    }

    /// Node versions from the root to the key's leaf as of `epoch`
    pub fn lookup_path(&self, key: &Bits, epoch: u64) -> Result<Vec<NodeId>> {
        self.check_key(key)?;
        match walk::walk(&self.view(epoch)?, key)? {
            walk::Walk::Found(path) => Ok(path),
            _ => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    /// Membership or non-membership proof for `key` against `root_hash(epoch)`
    pub fn prove(&self, key: &Bits, epoch: u64) -> Result<LookupProof> {
        self.check_key(key)?;
        walk::prove(&self.view(epoch)?, key)
    }

    /// Every version of a node, oldest first
    pub fn version_chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut oldest = id;
        while let Some(prev) = self.nodes[oldest.index()].prev {
            oldest = prev;
        }
        let mut chain = vec![oldest];
        let mut current = oldest;
        while let Some(next) = self.nodes[current.index()].next {
            chain.push(next);
            current = next;
        }
        chain
    }

    fn leaf_values(&self, id: NodeId) -> &[ValueEntry] {
        match &self.nodes[id.index()].kind {
            VersionedKind::Leaf { values } => values,
            VersionedKind::Internal { .. } => &[],
        }
    }

    fn view(&self, epoch: u64) -> Result<EpochView<'_>> {
        Ok(EpochView {
            trie: self,
            root: self.root_at(epoch)?,
            epoch,
        })
    }

    fn push(&mut self, node: VersionedNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn new_leaf(&mut self, label: Bits, entry: ValueEntry, parent: NodeId) -> NodeId {
        let values = vec![entry];
        self.push(VersionedNode {
            hash: leaf_hash(&label, &values),
            label,
            kind: VersionedKind::Leaf { values },
            epoch: self.epoch,
            prev: None,
            next: None,
            parent: Some(parent),
        })
    }

    /// A version of `id` that may be written in the current epoch
    fn writable(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<NodeId> {
        let node = &self.nodes[id.index()];
        if node.epoch > self.epoch {
            return Err(Error::StructuralInvariant(format!(
                "node from epoch {} reached in epoch {}",
                node.epoch, self.epoch
            )));
        }
        if node.epoch == self.epoch {
            if parent.is_some() {
                self.nodes[id.index()].parent = parent;
            }
            return Ok(id);
        }
        if node.next.is_some() {
            error!(node = id.0, epoch = node.epoch, "superseded node reached from the live root");
            return Err(Error::StructuralInvariant(
                "superseded node version reached from the live root".into(),
            ));
        }

        let mut copy = node.clone();
        copy.epoch = self.epoch;
        copy.prev = Some(id);
        copy.next = None;
        copy.parent = parent;
        let copy_id = self.push(copy);
        self.nodes[id.index()].next = Some(copy_id);
        Ok(copy_id)
    }

    fn set_child(&mut self, parent: NodeId, bit: u8, child: NodeId) -> Result<()> {
        match &mut self.nodes[parent.index()].kind {
            VersionedKind::Internal { left, right } => {
                if bit == 0 {
                    *left = Some(child);
                } else {
                    *right = Some(child);
                }
                Ok(())
            }
            VersionedKind::Leaf { .. } => Err(Error::StructuralInvariant(
                "leaf used as a parent".into(),
            )),
        }
    }

    fn rehash(&mut self, id: NodeId) -> Result<()> {
        let node = &self.nodes[id.index()];
        if node.epoch != self.epoch {
            return Err(Error::StructuralInvariant(format!(
                "rehash of a node from past epoch {}",
                node.epoch
            )));
        }
        let hash = match &node.kind {
            VersionedKind::Leaf { values } => leaf_hash(&node.label, values),
            VersionedKind::Internal { left, right } => {
                let left = left.map(|c| self.nodes[c.index()].hash);
                let right = right.map(|c| self.nodes[c.index()].hash);
                internal_hash(&node.label, left.as_ref(), right.as_ref())
            }
        };
        self.nodes[id.index()].hash = hash;
        Ok(())
    }

    /// Insert below the writable internal node `parent`, whose label ends at
    /// bit `depth`. Returns true when a new key was created.
    fn insert_below(
        &mut self,
        parent: NodeId,
        key: &Bits,
        depth: usize,
        entry: ValueEntry,
    ) -> Result<bool> {
        if depth >= key.len() {
            return Err(Error::StructuralInvariant(
                "key ends at an internal node".into(),
            ));
        }
        let side = key.bit(depth);

        let Some(child) = self.nodes[parent.index()].child(side) else {
            let leaf = self.new_leaf(key.suffix(depth), entry, parent);
            self.set_child(parent, side, leaf)?;
            self.rehash(parent)?;
            return Ok(true);
        };

        let label = self.nodes[child.index()].label.clone();
        let shared = key.common_prefix_len(depth, label.as_slice());

        let added = if shared < label.len() {
            if depth + shared >= key.len() {
                return Err(Error::StructuralInvariant(
                    "key ends inside a node label".into(),
                ));
            }
            // Split: the new top half is born in this epoch, the old node
            // keeps its label and a fresh version takes the lower half
            let upper = self.push(VersionedNode {
                label: label.slice(0, shared),
                kind: VersionedKind::Internal {
                    left: None,
                    right: None,
                },
                hash: Hash::ZERO,
                epoch: self.epoch,
                prev: None,
                next: None,
                parent: Some(parent),
            });
            let lower = self.writable(child, Some(upper))?;
            let lower_label = label.suffix(shared);
            let lower_side = lower_label.bit(0);
            self.nodes[lower.index()].label = lower_label;
            self.rehash(lower)?;

            let leaf = self.new_leaf(key.suffix(depth + shared), entry, upper);
            self.set_child(upper, lower_side, lower)?;
            self.set_child(upper, 1 - lower_side, leaf)?;
            self.rehash(upper)?;
            self.set_child(parent, side, upper)?;
            true
        } else {
            let child = self.writable(child, Some(parent))?;
            self.set_child(parent, side, child)?;
            let next = depth + label.len();
            match &mut self.nodes[child.index()].kind {
                VersionedKind::Leaf { values } if next == key.len() => {
                    values.push(entry);
                    self.rehash(child)?;
                    false
                }
                VersionedKind::Leaf { .. } => {
                    return Err(Error::StructuralInvariant(
                        "key continues past a leaf".into(),
                    ))
                }
                VersionedKind::Internal { .. } => self.insert_below(child, key, next, entry)?,
            }
        };

        self.rehash(parent)?;
        Ok(added)
    }
}

/// The trie as it stood at one epoch
struct EpochView<'a> {
    trie: &'a PersistentTrie,
    root: NodeId,
    epoch: u64,
}

impl TrieView for EpochView<'_> {
    type Id = NodeId;

    fn root(&self) -> Result<NodeId> {
        Ok(self.root)
    }

    fn label(&self, id: NodeId) -> &Bits {
        &self.trie.nodes[id.index()].label
    }

    fn hash(&self, id: NodeId) -> Hash {
        self.trie.nodes[id.index()].hash
    }

    fn children(&self, id: NodeId) -> Option<[Option<NodeId>; 2]> {
        match self.trie.nodes[id.index()].kind {
            VersionedKind::Internal { left, right } => Some([left, right]),
            VersionedKind::Leaf { .. } => None,
        }
    }

    fn values(&self, id: NodeId) -> &[ValueEntry] {
        self.trie.leaf_values(id)
    }

    fn visit(&self, id: NodeId) -> Result<()> {
        let created = self.trie.nodes[id.index()].epoch;
        if created > self.epoch {
            error!(
                node = id.0,
                created,
                epoch = self.epoch,
                "walk reached a node newer than the requested epoch"
            );
            return Err(Error::StructuralInvariant(format!(
                "node from epoch {} reached while reading epoch {}",
                created, self.epoch
            )));
        }
        Ok(())
    }
}
