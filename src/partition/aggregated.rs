//! Partition that commits every settled snapshot to a history forest

use super::digest::{CheckpointProof, Digest, ExistenceProof};
use super::epochs::EpochState;
use super::{Partition, PartitionKind, AUDIT_LAG};
use crate::error::{Error, Result};
use crate::history::{ConsistencyProof, HistoryForest};
use crate::model::Bits;

/// Proves existence against the base trie at the newest period under each
/// history-forest root, so a claim can be checked against any past period
#[derive(Debug)]
pub struct AggregatedPartition {
    state: EpochState,
    forest: HistoryForest,
}

impl AggregatedPartition {
    pub fn new(history_depth: u32) -> Result<Self> {
        let mut partition = AggregatedPartition {
            state: EpochState::new(),
            forest: HistoryForest::new(history_depth),
        };
        partition.increment_verification_period()?;
        partition.increment_verification_period()?;
        Ok(partition)
    }

    pub fn forest(&self) -> &HistoryForest {
        &self.forest
    }
}

impl Partition for AggregatedPartition {
    fn kind(&self) -> PartitionKind {
        PartitionKind::Aggregated
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
        // Refuse before touching the base trie so the partition stays whole
        if self.state.verification_epoch + 1 >= AUDIT_LAG && self.forest.is_full() {
            return Err(Error::HistoryFull {
                capacity: self.forest.capacity(),
            });
        }
        self.state.advance_verification()?;
        if let Some(settled) = self.state.verification_epoch.checked_sub(AUDIT_LAG) {
            let root = self.state.base.root_hash(settled)?;
            self.forest.append(root, settled)?;
        }
        Ok(())
    }

    fn digest(&self) -> Result<Digest> {
        self.state.digest(Some(self.forest.digest()))
    }

    fn existence_proof(&self, identifier: &[u8]) -> Result<ExistenceProof> {
        let key = Bits::for_identifier(identifier);
        let base = self
            .forest
            .digest()
            .roots
            .iter()
            .map(|root| self.state.base.prove(&key, root.period))
            .collect::<Result<Vec<_>>>()?;
        Ok(ExistenceProof {
            base,
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
        let history = match &previous.history {
            Some(old) => Some(self.forest.extension_proof(old.size, self.forest.len())?),
            None => None,
        };
        Ok(CheckpointProof {
            log: self.state.log_proof_since(previous)?,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::verify_extension;

    #[test]
    fn test_forest_gets_one_leaf_per_settled_period() {
        let mut partition = AggregatedPartition::new(8).unwrap();
        assert_eq!(partition.forest().len(), 1);
        for _ in 0..4 {
            partition.increment_verification_period().unwrap();
        }
        assert_eq!(partition.forest().len(), 5);
        let digest = partition.digest().unwrap();
        let history = digest.history.unwrap();
        assert_eq!(history.roots.len(), 2);
        assert_eq!(history.roots[1].period, 4);
    }

    #[test]
    fn test_one_base_proof_per_root() {
        let mut partition = AggregatedPartition::new(8).unwrap();
        partition.append(b"alice", b"key", b"sig").unwrap();
        for _ in 0..5 {
            partition.increment_verification_period().unwrap();
        }
        let proof = partition.existence_proof(b"alice").unwrap();
        let history = partition.digest().unwrap().history.unwrap();
        assert_eq!(proof.base.len(), history.roots.len());
    }

    #[test]
    fn test_history_checkpoint_extends() {
        let mut partition = AggregatedPartition::new(8).unwrap();
        let first = partition.digest().unwrap();
        for _ in 0..3 {
            partition.increment_verification_period().unwrap();
        }
        let second = partition.digest().unwrap();
        let proof = partition.checkpoint_proof(&first).unwrap();
        verify_extension(
            first.history.as_ref().unwrap(),
            second.history.as_ref().unwrap(),
            proof.history.as_ref().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_full_forest_stops_verification() {
        let mut partition = AggregatedPartition::new(1).unwrap();
        partition.increment_verification_period().unwrap();
        let before = partition.digest().unwrap();
        assert!(matches!(
            partition.increment_verification_period(),
            Err(Error::HistoryFull { capacity: 2 })
        ));
        assert_eq!(partition.digest().unwrap(), before);
    }
}
