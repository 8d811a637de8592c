//! Binary prefix tries over bit-string keys
//!
//! - [`PrefixTrie`]: a single mutable trie that can be sealed
//! - [`PersistentTrie`]: a versioned trie with one root per epoch
//!
//! Both produce the same node hashes for the same contents, so proofs from
//! either verify with the functions in [`proof`].

mod node;
pub mod persistent;
pub mod proof;
mod tree;
mod walk;

pub use node::TrieNode;
pub use persistent::{NodeId, PersistentTrie};
pub use proof::{CopathEntry, LookupProof, MembershipProof, NonMembershipProof};
pub use tree::PrefixTrie;
