//! Partitions: one base trie plus its update windows and epoch counters
//!
//! A partition runs two clocks. The update epoch seals recent appends
//! into a one-shot trie and logs its root, which makes them provable
//! quickly. The verification epoch snapshots the base trie and settles
//! the update window. Clients check base-trie proofs against the
//! snapshot [`AUDIT_LAG`] periods back, which an auditor has had a full
//! period to examine.

mod aggregated;
mod digest;
mod epochs;
mod window;

pub use aggregated::AggregatedPartition;
pub use digest::{chain_link, CheckpointProof, Digest, ExistenceProof};
pub use epochs::{EpochWindow, SealedSet};
pub use window::WindowPartition;

use crate::error::Result;
use crate::history::ConsistencyProof;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many verification periods the audited base snapshot trails the
/// current one
pub const AUDIT_LAG: u64 = 2;

/// Bits in a trie key: the length of an identifier hash
pub const KEY_BITS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Window,
    Aggregated,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKind::Window => write!(f, "window"),
            PartitionKind::Aggregated => write!(f, "aggregated"),
        }
    }
}

/// Operations every partition supports
///
/// Callers serialize all of these per partition; `append` assigns the
/// position and inserts in one step, and the epoch transitions run under
/// the same exclusion.
pub trait Partition: Send + fmt::Debug {
    fn kind(&self) -> PartitionKind;

    /// Insert `H(identifier) -> content hash` into the base trie and queue it
    /// for the next update epoch. Returns the assigned position.
    fn append(&mut self, identifier: &[u8], value: &[u8], signature: &[u8]) -> Result<u64>;

    /// Position the next append will receive
    fn next_position(&self) -> u64;

    /// Every position below this one is in a sealed update trie
    fn sealed_position(&self) -> u64;

    /// Seal queued appends into a new update trie and log its root
    fn increment_update_epoch(&mut self) -> Result<()>;

    /// Snapshot the base trie, rotate the update window and extend the chain
    fn increment_verification_period(&mut self) -> Result<()>;

    fn digest(&self) -> Result<Digest>;

    /// Membership or non-membership proofs for `identifier` against every
    /// trie the digest names
    fn existence_proof(&self, identifier: &[u8]) -> Result<ExistenceProof>;

    /// Consistency of the growing verify-side log since `old_size`
    fn update_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof>;

    /// Consistency of the query-side log since `old_size`, for a digest
    /// taken before the last verification period
    fn settled_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof>;

    /// Everything an auditor holding `previous` needs to accept the current
    /// digest
    fn checkpoint_proof(&self, previous: &Digest) -> Result<CheckpointProof>;
}

/// Build an empty partition of the requested kind
pub fn new_partition(aggregated: bool, history_depth: u32) -> Result<Box<dyn Partition>> {
    Ok(if aggregated {
        Box::new(AggregatedPartition::new(history_depth)?)
    } else {
        Box::new(WindowPartition::new()?)
    })
}
