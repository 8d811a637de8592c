//! Compressed binary trie with inclusion and exclusion proofs

use super::node::TrieNode;
use super::proof::LookupProof;
use super::walk::{self, TrieView};
use crate::error::{Error, Result};
use crate::model::{Bits, Hash, ValueEntry};
use serde::{Deserialize, Serialize};
use std::ptr;

/// A PATRICIA trie over fixed-length bit-string keys
///
/// The root is an internal node with an empty label and is the only node
/// allowed a missing child. A key's first value creates its leaf; later
/// values are appended to the same leaf. Once sealed the trie rejects
/// inserts and its root hash is final.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrefixTrie {
    root: TrieNode,
    key_len: Option<usize>,
    keys: usize,
    sealed: bool,
}

impl Default for PrefixTrie {
    fn default() -> Self {
        PrefixTrie::new()
    }
}

impl PrefixTrie {
    /// Create an empty trie; the first inserted key fixes the key length
    pub fn new() -> Self {
        PrefixTrie {
            root: TrieNode::internal(Bits::empty(), None, None),
            key_len: None,
            keys: 0,
            sealed: false,
        }
    }

    /// Create an empty trie accepting only keys of `key_len` bits
    pub fn with_key_len(key_len: usize) -> Self {
        PrefixTrie {
            key_len: Some(key_len),
            ..PrefixTrie::new()
        }
    }

    pub fn root_hash(&self) -> Hash {
        self.root.hash()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn check_key(&self, key: &Bits) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyLength {
                expected: self.key_len.unwrap_or(1),
                found: 0,
            });
        }
        match self.key_len {
            Some(expected) if expected != key.len() => Err(Error::KeyLength {
                expected,
                found: key.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Append `entry` under `key`, creating the key's leaf if needed
    pub fn insert(&mut self, key: &Bits, entry: ValueEntry) -> Result<()> {
        if self.sealed {
            return Err(Error::Sealed);
        }
        self.check_key(key)?;
        self.key_len.get_or_insert(key.len());

        let slot = self
            .root
            .child_slot(key.bit(0))
            .ok_or_else(|| Error::StructuralInvariant("root is a leaf".into()))?;
        let added = insert_into(slot, key, 0, entry)?;
        self.root.rehash();
        if added {
            self.keys += 1;
        }
        Ok(())
    }

    /// Values under `key` in append order
    pub fn get(&self, key: &Bits) -> Result<Option<&[ValueEntry]>> {
        if self.check_key(key).is_err() {
            return Ok(None);
        }
        match walk::walk(&self.view(), key)? {
            walk::Walk::Found(mut path) => Ok(path.pop().map(|leaf| leaf.0.values())),
            walk::Walk::Missing { .. } | walk::Walk::Diverged(_) => Ok(None),
        }
    }

    /// True if `key` holds a value with this content hash
    pub fn contains_value(&self, key: &Bits, hash: &Hash) -> Result<bool> {
        Ok(self
            .get(key)?
            .map(|values| values.iter().any(|v| &v.hash == hash))
            .unwrap_or(false))
    }

    /// Membership proof with the key's values, or a non-membership proof
    pub fn prove(&self, key: &Bits) -> Result<LookupProof> {
        self.check_key(key)?;
        walk::prove(&self.view(), key)
    }

    fn view(&self) -> NodeView<'_> {
        NodeView(&self.root)
    }
}

/// Insert below an empty or occupied slot whose node label starts at `depth`.
/// Returns true when a new key was created.
fn insert_into(
    slot: &mut Option<Box<TrieNode>>,
    key: &Bits,
    depth: usize,
    entry: ValueEntry,
) -> Result<bool> {
    let mut node = match slot.take() {
        None => {
            *slot = Some(Box::new(TrieNode::leaf(key.suffix(depth), vec![entry])));
            return Ok(true);
        }
        Some(node) => node,
    };

    let label_len = node.label().len();
    let shared = key.common_prefix_len(depth, node.label().as_slice());

    if shared < label_len {
        if depth + shared >= key.len() {
            *slot = Some(node);
            return Err(Error::StructuralInvariant(
                "key ends inside a node label".into(),
            ));
        }
        let upper = node.label().slice(0, shared);
        let lower = node.label().suffix(shared);
        node.set_label(lower);
        let leaf = Box::new(TrieNode::leaf(key.suffix(depth + shared), vec![entry]));
        let (left, right) = if node.label().bit(0) == 0 {
            (node, leaf)
        } else {
            (leaf, node)
        };
        *slot = Some(Box::new(TrieNode::internal(upper, Some(left), Some(right))));
        return Ok(true);
    }

    let next = depth + label_len;
    let result = match node.as_mut() {
        TrieNode::Leaf { values, .. } if next == key.len() => {
            values.push(entry);
            Ok(false)
        }
        TrieNode::Leaf { .. } => Err(Error::StructuralInvariant(
            "key continues past a leaf".into(),
        )),
        internal if next < key.len() => match internal.child_slot(key.bit(next)) {
            Some(child) => insert_into(child, key, next, entry),
            None => Err(Error::StructuralInvariant("missing child slot".into())),
        },
        _ => Err(Error::StructuralInvariant(
            "key ends at an internal node".into(),
        )),
    };
    node.rehash();
    *slot = Some(node);
    result
}

#[derive(Clone, Copy)]
struct NodeRef<'a>(&'a TrieNode);

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

struct NodeView<'a>(&'a TrieNode);

impl<'a> TrieView for NodeView<'a> {
    type Id = NodeRef<'a>;

    fn root(&self) -> Result<Self::Id> {
        Ok(NodeRef(self.0))
    }

    fn label(&self, id: Self::Id) -> &Bits {
        id.0.label()
    }

    fn hash(&self, id: Self::Id) -> Hash {
        id.0.hash()
    }

    fn children(&self, id: Self::Id) -> Option<[Option<Self::Id>; 2]> {
        if id.0.is_leaf() {
            None
        } else {
            Some([id.0.child(0).map(NodeRef), id.0.child(1).map(NodeRef)])
        }
    }

    fn values(&self, id: Self::Id) -> &[ValueEntry] {
        id.0.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> Bits {
        Bits::parse(s).unwrap()
    }

    fn entry(tag: &[u8], position: u64) -> ValueEntry {
        ValueEntry::new(Hash::digest(tag), position)
    }

    #[test]
    fn test_empty_trie() {
        let trie = PrefixTrie::new();
        assert!(trie.is_empty());
        let empty = PrefixTrie::new();
        assert_eq!(trie.root_hash(), empty.root_hash());
    }

    #[test]
    fn test_insert_and_get() {
        let mut trie = PrefixTrie::new();
        trie.insert(&key("000"), entry(b"a", 0)).unwrap();
        trie.insert(&key("111"), entry(b"b", 1)).unwrap();
        trie.insert(&key("001"), entry(b"c", 2)).unwrap();

        assert_eq!(trie.len(), 3);
        assert_eq!(trie.get(&key("001")).unwrap().unwrap(), &[entry(b"c", 2)]);
        assert!(trie.get(&key("011")).unwrap().is_none());
    }

    #[test]
    fn test_repeated_key_appends_values() {
        let mut trie = PrefixTrie::new();
        trie.insert(&key("10"), entry(b"a", 0)).unwrap();
        trie.insert(&key("10"), entry(b"b", 1)).unwrap();

        assert_eq!(trie.len(), 1);
        let values = trie.get(&key("10")).unwrap().unwrap();
        assert_eq!(values, &[entry(b"a", 0), entry(b"b", 1)]);
        assert!(trie.contains_value(&key("10"), &Hash::digest(b"b")).unwrap());
    }

    #[test]
    fn test_insertion_order_does_not_change_root() {
        let keys = ["000", "111", "001", "110"];
        let mut forward = PrefixTrie::new();
        let mut backward = PrefixTrie::new();
        for (i, k) in keys.iter().enumerate() {
            forward.insert(&key(k), entry(k.as_bytes(), i as u64)).unwrap();
        }
        for (i, k) in keys.iter().enumerate().rev() {
            backward.insert(&key(k), entry(k.as_bytes(), i as u64)).unwrap();
        }
        assert_eq!(forward.root_hash(), backward.root_hash());
    }

    #[test]
    fn test_sealed_rejects_insert() {
        let mut trie = PrefixTrie::new();
        trie.insert(&key("01"), entry(b"a", 0)).unwrap();
        let root = trie.root_hash();
        trie.seal();

        assert!(matches!(
            trie.insert(&key("10"), entry(b"b", 1)),
            Err(Error::Sealed)
        ));
        assert_eq!(trie.root_hash(), root);
    }

    #[test]
    fn test_key_length_enforced() {
        let mut trie = PrefixTrie::with_key_len(4);
        assert!(matches!(
            trie.insert(&key("010"), entry(b"a", 0)),
            Err(Error::KeyLength { expected: 4, found: 3 })
        ));

        let mut open = PrefixTrie::new();
        open.insert(&key("0101"), entry(b"a", 0)).unwrap();
        assert!(open.insert(&key("01"), entry(b"b", 1)).is_err());
    }

    #[test]
    fn test_membership_proof_verifies() {
        let mut trie = PrefixTrie::new();
        for (i, k) in ["000", "111", "001"].iter().enumerate() {
            trie.insert(&key(k), entry(k.as_bytes(), i as u64)).unwrap();
        }
        let root = trie.root_hash();

        let proof = trie.prove(&key("001")).unwrap();
        assert!(proof.is_member());
        proof.verify(&key("001"), &root).unwrap();

        // Same proof does not vouch for a different key
        assert!(proof.verify(&key("000"), &root).is_err());
    }

    #[test]
    fn test_non_membership_at_divergence() {
        let mut trie = PrefixTrie::new();
        for (i, k) in ["000", "111", "001"].iter().enumerate() {
            trie.insert(&key(k), entry(k.as_bytes(), i as u64)).unwrap();
        }
        let root = trie.root_hash();

        let proof = trie.prove(&key("011")).unwrap();
        let LookupProof::NonMember(ref inner) = proof else {
            panic!("expected non-membership");
        };
        assert_eq!(inner.frontier_label.to_string(), "00");
        proof.verify(&key("011"), &root).unwrap();

        // A present key cannot be shown absent with this frontier
        assert!(inner.verify(&key("001"), &root).is_err());
    }

    #[test]
    fn test_non_membership_at_empty_root_child() {
        let mut trie = PrefixTrie::new();
        trie.insert(&key("000"), entry(b"a", 0)).unwrap();
        trie.insert(&key("001"), entry(b"b", 1)).unwrap();
        let root = trie.root_hash();

        let proof = trie.prove(&key("100")).unwrap();
        let LookupProof::NonMember(ref inner) = proof else {
            panic!("expected non-membership");
        };
        assert!(inner.frontier_hash.is_none());
        assert_eq!(inner.copath.len(), 1);
        proof.verify(&key("100"), &root).unwrap();
    }

    #[test]
    fn test_empty_trie_non_membership() {
        let trie = PrefixTrie::with_key_len(3);
        let proof = trie.prove(&key("010")).unwrap();
        proof.verify(&key("010"), &trie.root_hash()).unwrap();
    }

    #[test]
    fn test_proof_fails_against_other_root() {
        let mut trie = PrefixTrie::new();
        trie.insert(&key("01"), entry(b"a", 0)).unwrap();
        let proof = trie.prove(&key("01")).unwrap();
        trie.insert(&key("10"), entry(b"b", 1)).unwrap();

        let err = proof.verify(&key("01"), &trie.root_hash()).unwrap_err();
        assert!(err.is_proof_failure());
    }

    proptest! {
        #[test]
        fn prop_every_key_proves(keys in proptest::collection::btree_set(any::<u16>(), 1..40), probe in any::<u16>()) {
            let mut trie = PrefixTrie::with_key_len(16);
            for (i, k) in keys.iter().enumerate() {
                trie.insert(&Bits::from_bytes(&k.to_be_bytes()), entry(&k.to_be_bytes(), i as u64)).unwrap();
            }
            let root = trie.root_hash();

            for k in &keys {
                let bits = Bits::from_bytes(&k.to_be_bytes());
                let proof = trie.prove(&bits).unwrap();
                prop_assert!(proof.is_member());
                prop_assert!(proof.verify(&bits, &root).is_ok());
            }

            let probe_bits = Bits::from_bytes(&probe.to_be_bytes());
            let proof = trie.prove(&probe_bits).unwrap();
            prop_assert_eq!(proof.is_member(), keys.contains(&probe));
            prop_assert!(proof.verify(&probe_bits, &root).is_ok());
        }
    }
}
