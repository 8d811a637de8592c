//! Append-only commitment log
//!
//! A Merkle tree over a sequence of `(epoch, root)` entries, built the way
//! RFC 6962 builds its log: the tree over `n` entries splits at the largest
//! power of two below `n`. Consistency proofs show a later tree contains an
//! earlier one as a prefix.

use crate::error::{Error, ProofSource, Result};
use crate::model::{Domain, Hash};
use serde::{Deserialize, Serialize};

/// One logged entry: an update epoch and the root of the trie sealed in it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: u64,
    pub root: Hash,
}

impl LogEntry {
    pub fn leaf_hash(&self) -> Hash {
        Hash::digest_parts(
            Domain::LogLeaf,
            &[&self.epoch.to_be_bytes(), self.root.as_bytes()],
        )
    }
}

/// Root and size of a log at some point in its history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDigest {
    pub root: Hash,
    pub size: u64,
}

/// Sibling hashes from RFC 6962 `PROOF(m, n)`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    pub old_size: u64,
    pub new_size: u64,
    pub path: Vec<Hash>,
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    Hash::digest_parts(Domain::LogNode, &[left.as_bytes(), right.as_bytes()])
}

/// Root of a log with no entries
pub fn empty_root() -> Hash {
    Hash::digest_parts(Domain::LogNode, &[])
}

/// Largest power of two strictly below `n` (`n >= 2`)
fn split_point(n: u64) -> u64 {
    1 << (63 - (n - 1).leading_zeros())
}

/// The commitment log
///
/// `levels[k][i]` holds the hash of the perfect subtree over entries
/// `[i * 2^k, (i + 1) * 2^k)`, filled in as entries arrive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitmentLog {
    entries: Vec<LogEntry>,
    levels: Vec<Vec<Hash>>,
}

impl CommitmentLog {
    pub fn new() -> Self {
        CommitmentLog::default()
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Append an entry and return its index
    pub fn append(&mut self, epoch: u64, root: Hash) -> u64 {
        let entry = LogEntry { epoch, root };
        let index = self.len();
        self.entries.push(entry);

        let mut hash = entry.leaf_hash();
        let mut level = 0;
        loop {
            if self.levels.len() == level {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(hash);
            let row = &self.levels[level];
            if row.len() % 2 == 1 {
                break;
            }
            hash = node_hash(&row[row.len() - 2], &row[row.len() - 1]);
            level += 1;
        }
        index
    }

    pub fn root(&self) -> Hash {
        self.subtree(0, self.len())
    }

    pub fn digest(&self) -> LogDigest {
        LogDigest {
            root: self.root(),
            size: self.len(),
        }
    }

    /// Digest the log had when it held `size` entries
    pub fn digest_at(&self, size: u64) -> Result<LogDigest> {
        if size > self.len() {
            return Err(Error::InvalidRange {
                old: size,
                new: self.len(),
            });
        }
        Ok(LogDigest {
            root: self.subtree(0, size),
            size,
        })
    }

    /// Merkle tree hash over entries `[start, end)`
    fn subtree(&self, start: u64, end: u64) -> Hash {
        let n = end - start;
        if n == 0 {
            return empty_root();
        }
        if n.is_power_of_two() && start % n == 0 {
            let level = n.trailing_zeros() as usize;
            return self.levels[level][(start / n) as usize];
        }
        let k = split_point(n);
        node_hash(&self.subtree(start, start + k), &self.subtree(start + k, end))
    }

    /// Proof that the first `old_size` entries are a prefix of the first
    /// `new_size`
    pub fn consistency_proof(&self, old_size: u64, new_size: u64) -> Result<ConsistencyProof> {
        if old_size > new_size || new_size > self.len() {
            return Err(Error::InvalidRange {
                old: old_size,
                new: new_size,
            });
        }
        let mut path = Vec::new();
        if old_size > 0 && old_size < new_size {
            self.subproof(old_size, 0, new_size, true, &mut path);
        }
        Ok(ConsistencyProof {
            old_size,
            new_size,
            path,
        })
    }

    fn subproof(&self, m: u64, start: u64, end: u64, complete: bool, path: &mut Vec<Hash>) {
        let n = end - start;
        if m == n {
            if !complete {
                path.push(self.subtree(start, end));
            }
            return;
        }
        let k = split_point(n);
        if m <= k {
            self.subproof(m, start, start + k, complete, path);
            path.push(self.subtree(start + k, end));
        } else {
            self.subproof(m - k, start + k, end, false, path);
            path.push(self.subtree(start, start + k));
        }
    }
}

/// Check that `new` extends `old`, following RFC 9162 section 2.1.4.2
pub fn verify_consistency(old: &LogDigest, new: &LogDigest, proof: &ConsistencyProof) -> Result<()> {
    let fail = |reason: &str| Err(Error::invalid(ProofSource::Log, reason));

    if proof.old_size != old.size || proof.new_size != new.size {
        return fail("proof sizes do not match the digests");
    }
    if old.size > new.size {
        return fail("old log is larger than new log");
    }
    if old.size == new.size {
        if !proof.path.is_empty() || old.root != new.root {
            return fail("equal sizes with different roots");
        }
        return Ok(());
    }
    if old.size == 0 {
        if !proof.path.is_empty() {
            return fail("non-empty proof from an empty log");
        }
        return Ok(());
    }

    // A power-of-two old tree is itself a node of the new one
    let mut nodes: Vec<Hash> = Vec::with_capacity(proof.path.len() + 1);
    if old.size.is_power_of_two() {
        nodes.push(old.root);
    }
    nodes.extend(proof.path.iter().copied());
    let mut nodes = nodes.into_iter();

    let mut fnode = old.size - 1;
    let mut snode = new.size - 1;
    while fnode & 1 == 1 {
        fnode >>= 1;
        snode >>= 1;
    }

    let Some(first) = nodes.next() else {
        return fail("empty proof");
    };
    let mut fr = first;
    let mut sr = first;

    for c in nodes {
        if snode == 0 {
            return fail("proof is longer than the tree");
        }
        if fnode & 1 == 1 || fnode == snode {
            fr = node_hash(&c, &fr);
            sr = node_hash(&c, &sr);
            while fnode & 1 == 0 && fnode != 0 {
                fnode >>= 1;
                snode >>= 1;
            }
        } else {
            sr = node_hash(&sr, &c);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    if snode != 0 {
        return fail("proof is shorter than the tree");
    }
    if fr != old.root {
        return fail("recomputed old root does not match");
    }
    if sr != new.root {
        return fail("recomputed new root does not match");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log_of(n: u64) -> CommitmentLog {
        let mut log = CommitmentLog::new();
        for i in 0..n {
            log.append(i, Hash::digest(&i.to_be_bytes()));
        }
        log
    }

    #[test]
    fn test_empty_log() {
        let log = CommitmentLog::new();
        assert_eq!(log.root(), empty_root());
        assert!(log.is_empty());
    }

    #[test]
    fn test_root_matches_recursive_definition() {
        let log = log_of(3);
        let leaves: Vec<Hash> = log.entries().iter().map(LogEntry::leaf_hash).collect();
        let expected = node_hash(&node_hash(&leaves[0], &leaves[1]), &leaves[2]);
        assert_eq!(log.root(), expected);
    }

    #[test]
    fn test_digest_at_is_stable() {
        let mut log = log_of(5);
        let before = log.digest();
        log.append(5, Hash::digest(b"more"));
        assert_eq!(log.digest_at(5).unwrap(), before);
        assert!(log.digest_at(7).is_err());
    }

    #[test]
    fn test_consistency_small_sizes() {
        let log = log_of(7);
        for m in 0..=7 {
            for n in m..=7 {
                let proof = log.consistency_proof(m, n).unwrap();
                let old = log.digest_at(m).unwrap();
                let new = log.digest_at(n).unwrap();
                verify_consistency(&old, &new, &proof).unwrap();
            }
        }
    }

    #[test]
    fn test_rfc_proof_shape() {
        // PROOF(3, D[7]) from RFC 6962 section 2.1.3 has four hashes
        let log = log_of(7);
        assert_eq!(log.consistency_proof(3, 7).unwrap().path.len(), 4);
        assert_eq!(log.consistency_proof(4, 7).unwrap().path.len(), 1);
        assert_eq!(log.consistency_proof(6, 7).unwrap().path.len(), 3);
    }

    #[test]
    fn test_tampered_proof_fails() {
        let log = log_of(6);
        let mut proof = log.consistency_proof(3, 6).unwrap();
        proof.path[0] = Hash::digest(b"forged");
        let err = verify_consistency(
            &log.digest_at(3).unwrap(),
            &log.digest_at(6).unwrap(),
            &proof,
        )
        .unwrap_err();
        assert!(err.is_proof_failure());
    }

    #[test]
    fn test_rewritten_history_fails() {
        let log = log_of(6);
        let mut other = CommitmentLog::new();
        other.append(0, Hash::digest(b"different"));
        for i in 1..6u64 {
            other.append(i, Hash::digest(&i.to_be_bytes()));
        }
        let proof = other.consistency_proof(2, 6).unwrap();
        assert!(verify_consistency(
            &log.digest_at(2).unwrap(),
            &other.digest_at(6).unwrap(),
            &proof
        )
        .is_err());
    }

    #[test]
    fn test_invalid_range() {
        let log = log_of(4);
        assert!(matches!(
            log.consistency_proof(3, 2),
            Err(Error::InvalidRange { old: 3, new: 2 })
        ));
    }

    proptest! {
        #[test]
        fn prop_consistency_holds(n in 1u64..70, m_seed in any::<u64>()) {
            let log = log_of(n);
            let m = m_seed % (n + 1);
            let proof = log.consistency_proof(m, n).unwrap();
            prop_assert!(verify_consistency(
                &log.digest_at(m).unwrap(),
                &log.digest(),
                &proof
            ).is_ok());
        }
    }
}
