//! Checkpoint auditing
//!
//! An auditor keeps the last digest it accepted for each partition and
//! certifies every new one as an extension of it, without downloading the
//! logs or tries.

use crate::error::{Error, ProofSource, Result};
use crate::history::{verify_consistency, verify_extension};
use crate::partition::{CheckpointProof, Digest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// How a digest was accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// First digest seen for the partition; trusted as-is
    First,
    /// Same verification period, the update log grew
    Extended,
    /// The verification period advanced by one and the chain checks out
    Settled,
    /// More than one period was missed; the digest becomes the new anchor
    Reanchored,
}

#[derive(Debug, Default)]
pub struct Auditor {
    last: HashMap<usize, Digest>,
}

impl Auditor {
    pub fn new() -> Self {
        Auditor::default()
    }

    /// Last accepted digest for `partition`
    pub fn last(&self, partition: usize) -> Option<&Digest> {
        self.last.get(&partition)
    }

    /// Check `digest` against the last accepted one and keep it on success.
    /// A rejected digest leaves the retained one untouched.
    pub fn observe(&mut self, partition: usize, digest: Digest, proof: &CheckpointProof) -> Result<Verdict> {
        let verdict = match self.last.get(&partition) {
            None => Verdict::First,
            Some(previous) => check(previous, &digest, proof).map_err(|e| {
                warn!(partition, error = %e, "checkpoint rejected");
                e
            })?,
        };
        debug!(
            partition,
            ?verdict,
            verification_epoch = digest.verification_epoch,
            update_epoch = digest.update_epoch,
            "checkpoint accepted"
        );
        self.last.insert(partition, digest);
        Ok(verdict)
    }
}

/// Certify `next` as an extension of `previous`
pub fn check(previous: &Digest, next: &Digest, proof: &CheckpointProof) -> Result<Verdict> {
    if next.update_epoch < previous.update_epoch {
        return Err(Error::invalid(
            ProofSource::Log,
            format!(
                "update epoch went back from {} to {}",
                previous.update_epoch, next.update_epoch
            ),
        ));
    }

    let verdict = if next.verification_epoch == previous.verification_epoch {
        verify_consistency(&previous.pending_log, &next.pending_log, &proof.log)?;
        let pending_growth = next.pending_log.size - previous.pending_log.size;
        if next.update_log.size.checked_sub(previous.update_log.size) != Some(pending_growth) {
            return Err(Error::invalid(
                ProofSource::Log,
                "update log and pending log grew by different amounts",
            ));
        }
        if next.chain != previous.chain || next.base_roots != previous.base_roots {
            return Err(Error::invalid(
                ProofSource::Chain,
                "chain or base snapshots changed within a period",
            ));
        }
        Verdict::Extended
    } else if next.verification_epoch == previous.verification_epoch + 1 {
        verify_consistency(&previous.pending_log, &next.update_log, &proof.log)?;
        if next.base_roots[0] != previous.base_roots[1] {
            return Err(Error::invalid(
                ProofSource::Chain,
                "base window did not slide by one snapshot",
            ));
        }
        if next.chain != previous.expected_next_chain(next) {
            return Err(Error::invalid(
                ProofSource::Chain,
                "chain does not extend the previous link",
            ));
        }
        Verdict::Settled
    } else if next.verification_epoch > previous.verification_epoch {
        warn!(
            from = previous.verification_epoch,
            to = next.verification_epoch,
            "missed verification periods, re-anchoring"
        );
        return Ok(Verdict::Reanchored);
    } else {
        return Err(Error::invalid(
            ProofSource::Chain,
            format!(
                "verification epoch went back from {} to {}",
                previous.verification_epoch, next.verification_epoch
            ),
        ));
    };

    check_history(previous, next, proof)?;
    Ok(verdict)
}

fn check_history(previous: &Digest, next: &Digest, proof: &CheckpointProof) -> Result<()> {
    match (&previous.history, &next.history) {
        (None, None) => Ok(()),
        (Some(old), Some(new)) => match &proof.history {
            Some(extension) => verify_extension(old, new, extension),
            None if old == new => Ok(()),
            None => Err(Error::invalid(ProofSource::History, "history grew without an extension proof")),
        },
        _ => Err(Error::invalid(ProofSource::History, "partition switched history modes")),
    }
}
