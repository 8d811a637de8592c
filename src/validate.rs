//! Client-side proof validation
//!
//! These functions trust nothing but a [`Digest`]. Every sub-proof is
//! recomputed against the root the digest names for it; one failure rejects
//! the whole claim, and the error says which sub-proof failed.

use crate::error::{Error, ProofSource, Result};
use crate::model::{content_hash, master_key_identifier, signed_payload, Bits, Hash, ValueEntry};
use crate::partition::{Digest, ExistenceProof};
use crate::trie::LookupProof;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Self-signed over the key bytes
    MasterKey,
    /// Signed over `value ‖ position` by the master key
    PublicKey,
}

/// A value the server says it published, with what is needed to check it
#[derive(Clone, Debug)]
pub struct Claim {
    pub identifier: Vec<u8>,
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
    pub position: u64,
    pub verifying_key: VerifyingKey,
    pub kind: ClaimKind,
}

/// Parse Ed25519 public-key bytes
pub fn parse_verifying_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let bytes: &[u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::invalid(ProofSource::Signature, "verifying key must be 32 bytes"))?;
    VerifyingKey::from_bytes(bytes)
        .map_err(|e| Error::invalid(ProofSource::Signature, format!("bad verifying key: {}", e)))
}

impl Claim {
    pub fn public_key(
        identifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        signature: impl Into<Vec<u8>>,
        position: u64,
        verifying_key: VerifyingKey,
    ) -> Self {
        Claim {
            identifier: identifier.into(),
            value: value.into(),
            signature: signature.into(),
            position,
            verifying_key,
            kind: ClaimKind::PublicKey,
        }
    }

    /// A master-key claim; the key verifies its own signature
    pub fn master_key(
        username: &[u8],
        master_key: &[u8],
        signature: impl Into<Vec<u8>>,
        position: u64,
    ) -> Result<Self> {
        Ok(Claim {
            identifier: master_key_identifier(username),
            value: master_key.to_vec(),
            signature: signature.into(),
            position,
            verifying_key: parse_verifying_key(master_key)?,
            kind: ClaimKind::MasterKey,
        })
    }

    pub fn key(&self) -> Bits {
        Bits::for_identifier(&self.identifier)
    }

    /// The `(content hash, position)` pair the leaf must hold
    pub fn leaf_entry(&self) -> ValueEntry {
        ValueEntry::new(
            content_hash(&self.identifier, &self.value, &self.signature, self.position),
            self.position,
        )
    }

    pub fn verify_signature(&self) -> Result<()> {
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| Error::invalid(ProofSource::Signature, format!("malformed signature: {}", e)))?;
        let message = match self.kind {
            ClaimKind::MasterKey => self.value.clone(),
            ClaimKind::PublicKey => signed_payload(&self.value, self.position),
        };
        self.verifying_key
            .verify(&message, &signature)
            .map_err(|_| Error::invalid(ProofSource::Signature, "signature does not verify"))
    }
}

/// The most recent membership proof seen so far and where it came from
type Latest<'p> = Option<(ProofSource, &'p LookupProof)>;

fn check_updates<'p>(
    digest: &Digest,
    proofs: &'p [LookupProof],
    key: &Bits,
    latest: &mut Latest<'p>,
) -> Result<()> {
    if proofs.len() != digest.update_roots.len() {
        return Err(Error::invalid(
            ProofSource::UpdateTrie(proofs.len()),
            format!(
                "{} update proofs for {} update tries",
                proofs.len(),
                digest.update_roots.len()
            ),
        ));
    }
    for (i, (proof, root)) in proofs.iter().zip(&digest.update_roots).enumerate() {
        proof
            .verify(key, root)
            .map_err(|e| e.at(ProofSource::UpdateTrie(i)))?;
        if proof.is_member() {
            *latest = Some((ProofSource::UpdateTrie(i), proof));
        }
    }
    Ok(())
}

/// Check base proofs in period order: absent until the first membership,
/// present from then on
fn check_base_history<'p>(roots: &[Hash], proofs: &'p [LookupProof], key: &Bits) -> Result<Latest<'p>> {
    if proofs.len() != roots.len() {
        return Err(Error::invalid(
            ProofSource::BaseTrie(proofs.len()),
            format!("{} base proofs for {} snapshots", proofs.len(), roots.len()),
        ));
    }
    let mut latest = None;
    for (i, (proof, root)) in proofs.iter().zip(roots).enumerate() {
        proof
            .verify(key, root)
            .map_err(|e| e.at(ProofSource::BaseTrie(i)))?;
        if proof.is_member() {
            latest = Some((ProofSource::BaseTrie(i), proof));
        } else if latest.is_some() {
            return Err(Error::invalid(
                ProofSource::BaseTrie(i),
                "key disappeared from a later snapshot",
            ));
        }
    }
    Ok(latest)
}

fn check_claim(claim: &Claim, latest: Latest<'_>) -> Result<()> {
    let (part, proof) =
        latest.ok_or_else(|| Error::invalid(ProofSource::BaseTrie(0), "no membership proof for the key"))?;
    if !proof.values().contains(&claim.leaf_entry()) {
        return Err(Error::invalid(part, "claimed value is not in the newest leaf"));
    }
    claim.verify_signature()
}

/// Validate against a window digest: one base proof at `v - 2`, then the
/// update tries
pub fn validate_window(digest: &Digest, proof: &ExistenceProof, claim: &Claim) -> Result<()> {
    let key = claim.key();
    let mut latest = check_base_history(&digest.base_roots[..1], &proof.base, &key)?;
    check_updates(digest, &proof.updates, &key, &mut latest)?;
    check_claim(claim, latest)
}

/// Validate against an aggregated digest: one base proof per history root
pub fn validate_history(digest: &Digest, proof: &ExistenceProof, claim: &Claim) -> Result<()> {
    let history = digest
        .history
        .as_ref()
        .ok_or_else(|| Error::invalid(ProofSource::History, "digest carries no history roots"))?;
    let roots: Vec<Hash> = history.roots.iter().map(|r| r.newest_leaf).collect();

    let key = claim.key();
    let mut latest = check_base_history(&roots, &proof.base, &key)?;
    check_updates(digest, &proof.updates, &key, &mut latest)?;
    check_claim(claim, latest)
}

/// Validate whichever kind of digest this is
pub fn validate(digest: &Digest, proof: &ExistenceProof, claim: &Claim) -> Result<()> {
    if digest.history.is_some() {
        validate_history(digest, proof, claim)
    } else {
        validate_window(digest, proof, claim)
    }
}

/// Check only the settled base snapshots, as an owner watching their own
/// key does: it must be present and must never vanish
pub fn validate_monitoring(digest: &Digest, proof: &ExistenceProof, claim: &Claim) -> Result<()> {
    let roots: Vec<Hash> = match &digest.history {
        Some(history) => history.roots.iter().map(|r| r.newest_leaf).collect(),
        None => vec![digest.base_roots[0]],
    };
    let latest = check_base_history(&roots, &proof.base, &claim.key())?;
    check_claim(claim, latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Partition, WindowPartition};
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_signature_payloads() {
        let owner = signing_key(1);
        let value = b"device-key".to_vec();
        let sig = owner.sign(&signed_payload(&value, 7)).to_bytes();

        let claim = Claim::public_key(b"alicePK".to_vec(), value.clone(), sig.to_vec(), 7, owner.verifying_key());
        claim.verify_signature().unwrap();

        let moved = Claim { position: 8, ..claim };
        assert!(moved.verify_signature().is_err());
    }

    #[test]
    fn test_master_key_self_signed() {
        let owner = signing_key(2);
        let mk = owner.verifying_key().to_bytes();
        let sig = owner.sign(&mk).to_bytes();
        let claim = Claim::master_key(b"alice", &mk, sig.to_vec(), 0).unwrap();
        assert_eq!(claim.identifier, b"aliceMK");
        claim.verify_signature().unwrap();
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(parse_verifying_key(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_window_claim_via_update_trie() {
        let owner = signing_key(3);
        let mut partition = WindowPartition::new().unwrap();
        let position = partition.next_position();
        let value = b"pk-1".to_vec();
        let sig = owner.sign(&signed_payload(&value, position)).to_bytes().to_vec();
        partition.append(b"bobPK", &value, &sig).unwrap();
        partition.increment_update_epoch().unwrap();

        let digest = partition.digest().unwrap();
        let proof = partition.existence_proof(b"bobPK").unwrap();
        let claim = Claim::public_key(b"bobPK".to_vec(), value, sig, position, owner.verifying_key());
        validate_window(&digest, &proof, &claim).unwrap();

        // Not yet in the settled snapshot
        assert!(validate_monitoring(&digest, &proof, &claim).is_err());
    }

    #[test]
    fn test_wrong_root_names_sub_proof() {
        let owner = signing_key(4);
        let mut partition = WindowPartition::new().unwrap();
        let value = b"pk".to_vec();
        let sig = owner.sign(&signed_payload(&value, 0)).to_bytes().to_vec();
        partition.append(b"carolPK", &value, &sig).unwrap();
        partition.increment_update_epoch().unwrap();
        partition.increment_update_epoch().unwrap();

        let mut digest = partition.digest().unwrap();
        digest.update_roots[1] = Hash::digest(b"tampered");
        let proof = partition.existence_proof(b"carolPK").unwrap();
        let claim = Claim::public_key(b"carolPK".to_vec(), value, sig, 0, owner.verifying_key());

        match validate_window(&digest, &proof, &claim) {
            Err(Error::ProofInvalid { part, .. }) => assert_eq!(part, ProofSource::UpdateTrie(1)),
            other => panic!("expected update trie failure, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_key_rejected() {
        let owner = signing_key(5);
        let partition = WindowPartition::new().unwrap();
        let digest = partition.digest().unwrap();
        let proof = partition.existence_proof(b"nobody").unwrap();
        let claim = Claim::public_key(b"nobody".to_vec(), b"v".to_vec(), vec![0; 64], 0, owner.verifying_key());
        assert!(validate_window(&digest, &proof, &claim).unwrap_err().is_proof_failure());
    }
}
