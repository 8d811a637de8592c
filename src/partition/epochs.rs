//! State shared by both partition kinds: the base trie, the two update
//! windows and the epoch counters

use super::digest::{chain_link, Digest};
use super::{AUDIT_LAG, KEY_BITS};
use crate::error::{Error, Result};
use crate::history::{CommitmentLog, ConsistencyProof, ForestDigest};
use crate::model::{content_hash, Bits, Hash, ValueEntry};
use crate::trie::{LookupProof, PersistentTrie, PrefixTrie};
use std::sync::Arc;
use tracing::{debug, info};

/// A commitment log and the sealed tries it covers
#[derive(Clone, Debug, Default)]
pub struct SealedSet {
    pub log: CommitmentLog,
    pub tries: Vec<Arc<PrefixTrie>>,
}

impl SealedSet {
    pub fn roots(&self) -> Vec<Hash> {
        self.tries.iter().map(|t| t.root_hash()).collect()
    }
}

/// The query side serves proofs; the verify side collects the current
/// period's tries and becomes the query side when the period ends
#[derive(Clone, Debug, Default)]
pub struct EpochWindow {
    pub query: SealedSet,
    pub verify: SealedSet,
}

impl EpochWindow {
    /// Record a sealed trie on both sides
    pub fn seal(&mut self, update_epoch: u64, trie: Arc<PrefixTrie>) {
        let root = trie.root_hash();
        self.query.log.append(update_epoch, root);
        self.query.tries.push(Arc::clone(&trie));
        self.verify.log.append(update_epoch, root);
        self.verify.tries.push(trie);
    }

    /// Promote the verify side and start an empty one
    pub fn rotate(&mut self) {
        self.query = std::mem::take(&mut self.verify);
    }
}

#[derive(Debug)]
pub(crate) struct EpochState {
    pub(crate) base: PersistentTrie,
    pub(crate) window: EpochWindow,
    pending: Vec<(Bits, ValueEntry)>,
    update_epoch: u64,
    pub(crate) verification_epoch: u64,
    settled_update_epoch: u64,
    next_position: u64,
    sealed_position: u64,
    chain: Hash,
}

impl EpochState {
    pub(crate) fn new() -> Self {
        EpochState {
            base: PersistentTrie::with_key_len(KEY_BITS),
            window: EpochWindow::default(),
            pending: Vec::new(),
            update_epoch: 0,
            verification_epoch: 0,
            settled_update_epoch: 0,
            next_position: 0,
            sealed_position: 0,
            chain: Hash::ZERO,
        }
    }

    pub(crate) fn next_position(&self) -> u64 {
        self.next_position
    }

    pub(crate) fn sealed_position(&self) -> u64 {
        self.sealed_position
    }

    /// Assign the next position and insert into the base trie in one step
    pub(crate) fn append(&mut self, identifier: &[u8], value: &[u8], signature: &[u8]) -> Result<u64> {
        let key = Bits::for_identifier(identifier);
        let position = self.next_position;
        let entry = ValueEntry::new(content_hash(identifier, value, signature, position), position);

        self.base.insert(&key, entry)?;
        self.pending.push((key, entry));
        self.next_position += 1;
        debug!(position, pending = self.pending.len(), "append");
        Ok(position)
    }

    pub(crate) fn seal_pending(&mut self) -> Result<()> {
        let mut trie = PrefixTrie::with_key_len(KEY_BITS);
        for (key, entry) in self.pending.drain(..) {
            trie.insert(&key, entry)?;
        }
        trie.seal();
        self.update_epoch += 1;
        self.sealed_position = self.next_position;
        debug!(
            update_epoch = self.update_epoch,
            keys = trie.len(),
            root = %trie.root_hash().short(),
            "sealed update trie"
        );
        self.window.seal(self.update_epoch, Arc::new(trie));
        Ok(())
    }

    pub(crate) fn advance_verification(&mut self) -> Result<()> {
        self.base.next_epoch();
        self.verification_epoch += 1;
        self.window.rotate();
        self.settled_update_epoch = self.update_epoch;

        if let Some(older) = self.verification_epoch.checked_sub(AUDIT_LAG) {
            let older_root = self.base.root_hash(older)?;
            let newer_root = self.base.root_hash(older + 1)?;
            self.chain = chain_link(&older_root, &newer_root, self.update_epoch, &self.chain);
        }
        info!(
            verification_epoch = self.verification_epoch,
            update_epoch = self.update_epoch,
            chain = %self.chain.short(),
            "verification period advanced"
        );
        Ok(())
    }

    /// Base-trie epoch that existence proofs are checked against
    pub(crate) fn audited_epoch(&self) -> Result<u64> {
        self.verification_epoch
            .checked_sub(AUDIT_LAG)
            .ok_or(Error::EpochNotYetOccurred {
                requested: AUDIT_LAG,
                current: self.verification_epoch,
            })
    }

    pub(crate) fn update_proofs(&self, key: &Bits) -> Result<Vec<LookupProof>> {
        self.window
            .query
            .tries
            .iter()
            .map(|trie| trie.prove(key))
            .collect()
    }

    pub(crate) fn digest(&self, history: Option<ForestDigest>) -> Result<Digest> {
        let older = self.audited_epoch()?;
        Ok(Digest {
            base_roots: [self.base.root_hash(older)?, self.base.root_hash(older + 1)?],
            base_size: self.base.size_at(older)?,
            update_log: self.window.query.log.digest(),
            pending_log: self.window.verify.log.digest(),
            update_roots: self.window.query.roots(),
            update_epoch: self.update_epoch,
            verification_epoch: self.verification_epoch,
            settled_update_epoch: self.settled_update_epoch,
            chain: self.chain,
            history,
        })
    }

    pub(crate) fn update_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof> {
        let log = &self.window.verify.log;
        log.consistency_proof(old_size, log.len())
    }

    pub(crate) fn settled_consistency_proof(&self, old_size: u64) -> Result<ConsistencyProof> {
        let log = &self.window.query.log;
        log.consistency_proof(old_size, log.len())
    }

    /// Log proof linking `previous` to the current digest: within a period
    /// the pending log grows; across one period it became the update log
    pub(crate) fn log_proof_since(&self, previous: &Digest) -> Result<ConsistencyProof> {
        let old_size = previous.pending_log.size;
        if previous.verification_epoch == self.verification_epoch {
            self.update_consistency_proof(old_size)
        } else if previous.verification_epoch + 1 == self.verification_epoch {
            self.settled_consistency_proof(old_size)
        } else {
            Ok(ConsistencyProof::default())
        }
    }
}
