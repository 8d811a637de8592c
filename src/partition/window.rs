//! Partition that settles against a fixed two-epoch window

use super::digest::{CheckpointProof, Digest, ExistenceProof};
use super::epochs::EpochState;
use super::{Partition, PartitionKind};
use crate::error::Result;
use crate::history::ConsistencyProof;
use crate::model::Bits;

/// Proves existence against the base trie at `v - 2` plus every query-side
/// update trie
#[derive(Debug)]
pub struct WindowPartition {
    state: EpochState,
}

impl WindowPartition {
    /// A partition advanced twice, so the `v - 2` snapshot exists
    pub fn new() -> Result<Self> {
        let mut state = EpochState::new();
        state.advance_verification()?;
        state.advance_verification()?;
        Ok(WindowPartition { state })
    }
}

impl Partition for WindowPartition {
    fn kind(&self) -> PartitionKind {
        PartitionKind::Window
    }

    fn append(&mut self, identifier: &[u8], value: &[u8], signature: &[u8]) -> Result<u64> {
        self.state.append(identifier, value, signature)
    }

    fn next_position(&self) -> u64 {
        self.state.next_position()
    }

    fn sealed_position(&self) -> u64 {
        self.state.sealed_position()
    }

    fn increment_update_epoch(&mut self) -> Result<()> {
        self.state.seal_pending()
    }

    fn increment_verification_period(&mut self) -> Result<()> {
        self.state.advance_verification()
    }

    fn digest(&self) -> Result<Digest> {
        self.state.digest(None)
    }

    fn existence_proof(&self, identifier: &[u8]) -> Result<ExistenceProof> {
        let key = Bits::for_identifier(identifier);
        let epoch = self.state.audited_epoch()?;
        Ok(ExistenceProof {
            base: vec![self.state.base.prove(&key, epoch)?],
            updates: self.state.update_proofs(&key)?,
        })
    }

    fn update_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof> {
        self.state.update_consistency_proof(old_size)
    }

    fn settled_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof> {
        self.state.settled_consistency_proof(old_size)
    }

    fn checkpoint_proof(&self, previous: &Digest) -> Result<CheckpointProof> {
        Ok(CheckpointProof {
            log: self.state.log_proof_since(previous)?,
            history: None,
        })
    }
}
