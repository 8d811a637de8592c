//! History forest
//!
//! One leaf per settled verification period, kept as a binary counter of
//! perfect subtrees: a forest over `n` leaves has one root per set bit of
//! `n`, largest first. Every node records the newest leaf below it, so a
//! root alone tells a verifier which base-trie snapshot it stands for.

use crate::error::{Error, ProofSource, Result};
use crate::model::{Domain, Hash};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A forest node: its hash plus the newest leaf it covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestNode {
    pub hash: Hash,
    /// Base-trie root of the rightmost leaf below this node
    pub newest_leaf: Hash,
    /// Verification period of that leaf
    pub period: u64,
}

impl ForestNode {
    fn leaf(trie_root: Hash, period: u64) -> Self {
        ForestNode {
            hash: Hash::digest_parts(
                Domain::ForestNode,
                &[trie_root.as_bytes(), &period.to_be_bytes()],
            ),
            newest_leaf: trie_root,
            period,
        }
    }

    fn combine(left: &ForestNode, right: &ForestNode) -> Self {
        ForestNode {
            hash: Hash::digest_parts(
                Domain::ForestNode,
                &[
                    left.hash.as_bytes(),
                    right.hash.as_bytes(),
                    right.newest_leaf.as_bytes(),
                    &right.period.to_be_bytes(),
                ],
            ),
            newest_leaf: right.newest_leaf,
            period: right.period,
        }
    }
}

/// Root set of the forest at some size
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestDigest {
    pub roots: Vec<ForestNode>,
    pub size: u64,
}

/// Right-hand siblings needed to rebuild the first changed root
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionProof {
    pub old_size: u64,
    pub new_size: u64,
    pub siblings: Vec<ForestNode>,
}

/// `(level, first leaf)` of every root of a forest with `size` leaves
fn root_positions(size: u64) -> Vec<(u32, u64)> {
    let mut positions = Vec::with_capacity(size.count_ones() as usize);
    let mut start = 0u64;
    for level in (0..64u32).rev() {
        if (size >> level) & 1 == 1 {
            positions.push((level, start));
            start += 1 << level;
        }
    }
    positions
}

/// Index of the first old root that is no longer a root at `new_size`
fn first_changed(old_size: u64, new_size: u64) -> (Vec<(u32, u64)>, Vec<(u32, u64)>, usize) {
    let old = root_positions(old_size);
    let new = root_positions(new_size);
    let changed = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    (old, new, changed)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryForest {
    /// `levels[k][i]` covers leaves `[i * 2^k, (i + 1) * 2^k)`
    levels: Vec<Vec<ForestNode>>,
    depth: u32,
}

impl HistoryForest {
    /// A forest holding at most `2^depth` leaves
    pub fn new(depth: u32) -> Self {
        HistoryForest {
            levels: Vec::new(),
            depth,
        }
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn len(&self) -> u64 {
        self.levels.first().map(|l| l.len() as u64).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit the base-trie root of one settled period
    pub fn append(&mut self, trie_root: Hash, period: u64) -> Result<u64> {
        let index = self.len();
        if self.is_full() {
            return Err(Error::HistoryFull {
                capacity: self.capacity(),
            });
        }

        let mut node = ForestNode::leaf(trie_root, period);
        let mut level = 0;
        loop {
            if self.levels.len() == level {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(node);
            let row = &self.levels[level];
            if row.len() % 2 == 1 {
                break;
            }
            node = ForestNode::combine(&row[row.len() - 2], &row[row.len() - 1]);
            level += 1;
        }
        debug!(index, period, "history leaf committed");
        Ok(index)
    }

    pub fn digest(&self) -> ForestDigest {
        ForestDigest {
            roots: self.roots(self.len()),
            size: self.len(),
        }
    }

    /// The root set the forest had with `size` leaves
    pub fn digest_at(&self, size: u64) -> Result<ForestDigest> {
        if size > self.len() {
            return Err(Error::InvalidRange {
                old: size,
                new: self.len(),
            });
        }
        Ok(ForestDigest {
            roots: self.roots(size),
            size,
        })
    }

    fn roots(&self, size: u64) -> Vec<ForestNode> {
        root_positions(size)
            .into_iter()
            .map(|(level, start)| self.levels[level as usize][(start >> level) as usize])
            .collect()
    }

    /// Proof that the forest at `new_size` contains the forest at `old_size`
    pub fn extension_proof(&self, old_size: u64, new_size: u64) -> Result<ExtensionProof> {
        if old_size > new_size || new_size > self.len() {
            return Err(Error::InvalidRange {
                old: old_size,
                new: new_size,
            });
        }
        let mut proof = ExtensionProof {
            old_size,
            new_size,
            siblings: Vec::new(),
        };
        let (old, new, changed) = first_changed(old_size, new_size);
        let Some(&(mut level, mut start)) = old.last() else {
            return Ok(proof);
        };
        if changed == old.len() {
            return Ok(proof);
        }

        // Climb from the smallest old root to the new root that absorbed it
        let target = new[changed].0;
        while level < target {
            if (start >> level) & 1 == 1 {
                start -= 1 << level;
            } else {
                let sibling = ((start >> level) + 1) as usize;
                proof.siblings.push(self.levels[level as usize][sibling]);
            }
            level += 1;
        }
        Ok(proof)
    }
}

/// Check that `new` extends `old` without altering any committed leaf
pub fn verify_extension(old: &ForestDigest, new: &ForestDigest, proof: &ExtensionProof) -> Result<()> {
    let fail = |reason: &str| Err(Error::invalid(ProofSource::History, reason));

    if proof.old_size != old.size || proof.new_size != new.size {
        return fail("proof sizes do not match the digests");
    }
    if old.size > new.size {
        return fail("old forest is larger than new forest");
    }
    if old.roots.len() != old.size.count_ones() as usize
        || new.roots.len() != new.size.count_ones() as usize
    {
        return fail("root count does not match forest size");
    }

    let (old_pos, new_pos, changed) = first_changed(old.size, new.size);
    if old.roots[..changed] != new.roots[..changed] {
        return fail("a settled root was rewritten");
    }
    if changed == old_pos.len() {
        if !proof.siblings.is_empty() {
            return fail("unexpected siblings");
        }
        return Ok(());
    }

    let (target_level, target_start) = new_pos[changed];
    let mut j = old.roots.len() - 1;
    let mut current = old.roots[j];
    let (mut level, mut start) = old_pos[j];
    let mut siblings = proof.siblings.iter();

    while level < target_level {
        if (start >> level) & 1 == 1 {
            if j <= changed {
                return fail("walk passed the first changed root");
            }
            j -= 1;
            current = ForestNode::combine(&old.roots[j], &current);
            start -= 1 << level;
        } else {
            let Some(right) = siblings.next() else {
                return fail("proof is missing a sibling");
            };
            current = ForestNode::combine(&current, right);
        }
        level += 1;
    }

    if j != changed || start != target_start {
        return fail("walk did not consume every changed root");
    }
    if siblings.next().is_some() {
        return fail("proof has extra siblings");
    }
    if current != new.roots[changed] {
        return fail("rebuilt root does not match the new digest");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forest_of(n: u64) -> HistoryForest {
        let mut forest = HistoryForest::new(16);
        for period in 0..n {
            forest
                .append(Hash::digest(&period.to_be_bytes()), period)
                .unwrap();
        }
        forest
    }

    #[test]
    fn test_root_count_is_popcount() {
        for n in 0..20u64 {
            assert_eq!(forest_of(n).digest().roots.len(), n.count_ones() as usize);
        }
    }

    #[test]
    fn test_roots_track_newest_leaf() {
        let forest = forest_of(5);
        let digest = forest.digest();
        assert_eq!(digest.roots[0].period, 3);
        assert_eq!(digest.roots[0].newest_leaf, Hash::digest(&3u64.to_be_bytes()));
        assert_eq!(digest.roots[1].period, 4);
    }

    #[test]
    fn test_extension_all_pairs() {
        let forest = forest_of(13);
        for old in 0..=13 {
            for new in old..=13 {
                let proof = forest.extension_proof(old, new).unwrap();
                verify_extension(
                    &forest.digest_at(old).unwrap(),
                    &forest.digest_at(new).unwrap(),
                    &proof,
                )
                .unwrap();
            }
        }
    }

    #[test]
    fn test_rewritten_leaf_detected() {
        let honest = forest_of(6);
        let mut forged = HistoryForest::new(16);
        for period in 0..8u64 {
            let root = if period == 1 {
                Hash::digest(b"forged")
            } else {
                Hash::digest(&period.to_be_bytes())
            };
            forged.append(root, period).unwrap();
        }
        let proof = forged.extension_proof(6, 8).unwrap();
        assert!(verify_extension(
            &honest.digest_at(6).unwrap(),
            &forged.digest_at(8).unwrap(),
            &proof
        )
        .is_err());
    }

    #[test]
    fn test_tampered_newest_leaf_detected() {
        let forest = forest_of(7);
        let proof = forest.extension_proof(3, 7).unwrap();
        let mut new = forest.digest_at(7).unwrap();
        new.roots[0].newest_leaf = Hash::digest(b"other");
        assert!(verify_extension(&forest.digest_at(3).unwrap(), &new, &proof).is_err());
    }

    #[test]
    fn test_capacity() {
        let mut forest = HistoryForest::new(2);
        for period in 0..4 {
            forest.append(Hash::digest(b"x"), period).unwrap();
        }
        assert!(matches!(
            forest.append(Hash::digest(b"x"), 4),
            Err(Error::HistoryFull { capacity: 4 })
        ));
    }
}
