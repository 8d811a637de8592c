//! What a partition publishes and what it hands out as proof

use crate::history::{ConsistencyProof, ExtensionProof, ForestDigest, LogDigest};
use crate::model::{Domain, Hash};
use crate::trie::LookupProof;
use serde::{Deserialize, Serialize};

/// Snapshot of a partition's commitments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Base-trie roots at verification epochs `v - 2` and `v - 1`
    pub base_roots: [Hash; 2],
    /// Distinct keys in the base trie at `v - 2`
    pub base_size: u64,
    /// Query-side update log
    pub update_log: LogDigest,
    /// Verify-side update log, still growing this period
    pub pending_log: LogDigest,
    /// Roots of the query-side sealed update tries, oldest first
    pub update_roots: Vec<Hash>,
    pub update_epoch: u64,
    pub verification_epoch: u64,
    /// Update epoch bound into the latest chain link
    pub settled_update_epoch: u64,
    pub chain: Hash,
    /// History forest roots, for partitions that keep one
    pub history: Option<ForestDigest>,
}

impl Digest {
    /// Chain value `next` must carry if it is the period right after `self`
    pub fn expected_next_chain(&self, next: &Digest) -> Hash {
        chain_link(
            &next.base_roots[0],
            &next.base_roots[1],
            next.settled_update_epoch,
            &self.chain,
        )
    }
}

/// One step of the verification-epoch hash chain
pub fn chain_link(older: &Hash, newer: &Hash, update_epoch: u64, previous: &Hash) -> Hash {
    Hash::digest_parts(
        Domain::Chain,
        &[
            older.as_bytes(),
            newer.as_bytes(),
            &update_epoch.to_be_bytes(),
            previous.as_bytes(),
        ],
    )
}

/// Proofs that an identifier is or is not in each published trie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceProof {
    /// One proof for the window partition (epoch `v - 2`), one per
    /// history root for the aggregated partition
    pub base: Vec<LookupProof>,
    /// One proof per query-side sealed update trie, in digest order
    pub updates: Vec<LookupProof>,
}

impl ExistenceProof {
    pub fn has_membership(&self) -> bool {
        self.base.iter().chain(&self.updates).any(LookupProof::is_member)
    }
}

/// Proof that a digest extends an earlier one from the same partition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProof {
    pub log: ConsistencyProof,
    pub history: Option<ExtensionProof>,
}
