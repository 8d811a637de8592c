//! Multi-partition directory
//!
//! Identifiers are spread over partitions by their hash. Each partition sits
//! behind its own mutex, held across position assignment, trie insertion and
//! the store write, and across epoch transitions. The values themselves go
//! to an unauthenticated [`Storage`]; the tries only commit to their hashes.

mod driver;

pub use driver::EpochDriver;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{content_hash, master_key_identifier, public_key_identifier, Domain, Hash, ValueEntry};
use crate::partition::{new_partition, CheckpointProof, Digest, ExistenceProof, Partition};
use crate::store::{encode_prepended, load_records, MemoryStore, Storage, ValueRecord};
use crate::trie::LookupProof;
use crate::validate::{parse_verifying_key, Claim};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A provable value with everything a client needs to check it
#[derive(Clone, Debug)]
pub struct Lookup {
    pub record: ValueRecord,
    pub partition: usize,
    pub digest: Digest,
    pub proof: ExistenceProof,
}

pub struct Directory {
    partitions: Vec<Mutex<Box<dyn Partition>>>,
    store: Arc<dyn Storage>,
}

impl Directory {
    pub fn new(config: &Config, store: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;
        let partitions = (0..config.partitions)
            .map(|_| new_partition(config.aggregated_history, config.history_depth).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        info!(
            partitions = partitions.len(),
            aggregated = config.aggregated_history,
            "directory ready"
        );
        Ok(Directory { partitions, store })
    }

    /// A directory whose values live in memory
    pub fn in_memory(config: &Config) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition an identifier belongs to
    pub fn partition_for(&self, identifier: &[u8]) -> usize {
        let hash = Hash::digest_parts(Domain::Identifier, &[identifier]);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_be_bytes(prefix) % self.partitions.len() as u64) as usize
    }

    fn partition(&self, index: usize) -> Result<&Mutex<Box<dyn Partition>>> {
        self.partitions
            .get(index)
            .ok_or_else(|| Error::KeyNotFound(format!("partition {}", index)))
    }

    /// Publish a self-signed master key; each username registers once
    pub fn register(&self, username: &[u8], master_key: &[u8], signature: &[u8]) -> Result<u64> {
        let identifier = master_key_identifier(username);
        let mut partition = self.partitions[self.partition_for(&identifier)].lock();

        let records = load_records(self.store.as_ref(), &identifier)?;
        if !records.is_empty() {
            return Err(Error::AlreadyRegistered(String::from_utf8_lossy(username).into_owned()));
        }
        Claim::master_key(username, master_key, signature.to_vec(), partition.next_position())?
            .verify_signature()?;

        let position = self.commit(&mut **partition, &identifier, records, master_key, signature)?;
        debug!(position, "registered master key");
        Ok(position)
    }

    /// Publish a public key for a registered user.
    ///
    /// `sign` receives the assigned position while the partition is held and
    /// returns the owner's signature over `value ‖ position`, which must
    /// verify under the user's master key. Master keys only change through
    /// [`Directory::register`].
    pub fn append<F>(&self, username: &[u8], value: &[u8], sign: F) -> Result<u64>
    where
        F: FnOnce(u64) -> Vec<u8>,
    {
        let master_key = load_records(self.store.as_ref(), &master_key_identifier(username))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotRegistered(String::from_utf8_lossy(username).into_owned()))?;
        let verifying_key = parse_verifying_key(&master_key.value)?;

        let identifier = public_key_identifier(username);
        let mut partition = self.partitions[self.partition_for(&identifier)].lock();
        let position = partition.next_position();
        let signature = sign(position);
        Claim::public_key(identifier.clone(), value, signature.clone(), position, verifying_key)
            .verify_signature()?;

        let records = load_records(self.store.as_ref(), &identifier)?;
        self.commit(&mut **partition, &identifier, records, value, &signature)
    }

    /// Insert into the partition and store the updated record list.
    ///
    /// Everything that can fail runs before the insert except the final
    /// `put`; if that fails the position stays committed with no stored value.
    fn commit(
        &self,
        partition: &mut dyn Partition,
        identifier: &[u8],
        records: Vec<ValueRecord>,
        value: &[u8],
        signature: &[u8],
    ) -> Result<u64> {
        let position = partition.next_position();
        let record = ValueRecord {
            position,
            value: value.to_vec(),
            signature: signature.to_vec(),
        };
        let encoded = encode_prepended(records, record)?;

        let assigned = partition.append(identifier, value, signature)?;
        if assigned != position {
            return Err(Error::StructuralInvariant(format!(
                "append took position {} but {} was expected",
                assigned, position
            )));
        }
        self.store.put(identifier, &encoded)?;
        Ok(position)
    }

    /// Position the next append under `identifier` will receive
    pub fn next_position(&self, identifier: &[u8]) -> u64 {
        self.partitions[self.partition_for(identifier)].lock().next_position()
    }

    pub fn lookup_master_key(&self, username: &[u8]) -> Result<ValueRecord> {
        let identifier = master_key_identifier(username);
        load_records(self.store.as_ref(), &identifier)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::KeyNotFound(String::from_utf8_lossy(&identifier).into_owned()))
    }

    /// Newest sealed public key published at or before `at_position`.
    /// Keys still waiting for the next update epoch are not returned.
    pub fn lookup_public_key(&self, username: &[u8], at_position: u64) -> Result<ValueRecord> {
        let identifier = public_key_identifier(username);
        let sealed = self.partitions[self.partition_for(&identifier)].lock().sealed_position();
        load_records(self.store.as_ref(), &identifier)?
            .into_iter()
            .find(|record| record.position < sealed && record.position <= at_position)
            .ok_or_else(|| Error::KeyNotFound(String::from_utf8_lossy(&identifier).into_owned()))
    }

    /// Newest value under `identifier` that the current digest can prove
    pub fn lookup_with_proof(&self, identifier: &[u8]) -> Result<Lookup> {
        let index = self.partition_for(identifier);
        let (digest, proof, records) = {
            let partition = self.partitions[index].lock();
            (
                partition.digest()?,
                partition.existence_proof(identifier)?,
                load_records(self.store.as_ref(), identifier)?,
            )
        };

        let latest = proof
            .base
            .iter()
            .chain(&proof.updates)
            .filter(|p| p.is_member())
            .last()
            .map(LookupProof::values)
            .unwrap_or(&[]);
        let record = records
            .into_iter()
            .find(|record| {
                let entry = ValueEntry::new(
                    content_hash(identifier, &record.value, &record.signature, record.position),
                    record.position,
                );
                latest.contains(&entry)
            })
            .ok_or_else(|| Error::KeyNotFound(String::from_utf8_lossy(identifier).into_owned()))?;

        Ok(Lookup {
            record,
            partition: index,
            digest,
            proof,
        })
    }

    pub fn checkpoint(&self, partition: usize) -> Result<Digest> {
        self.partition(partition)?.lock().digest()
    }

    /// The current digest with the proof that it extends `previous`
    pub fn checkpoint_with_proof(&self, partition: usize, previous: &Digest) -> Result<(Digest, CheckpointProof)> {
        let partition = self.partition(partition)?.lock();
        Ok((partition.digest()?, partition.checkpoint_proof(previous)?))
    }

    pub fn increment_update_epoch(&self) -> Result<()> {
        for partition in &self.partitions {
            partition.lock().increment_update_epoch()?;
        }
        Ok(())
    }

    pub fn increment_verification_period(&self) -> Result<()> {
        for partition in &self.partitions {
            partition.lock().increment_verification_period()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::signed_payload;
    use crate::validate::validate;
    use ed25519_dalek::{Signer, SigningKey};

    fn directory(partitions: usize) -> Directory {
        let config = Config {
            partitions,
            ..Config::default()
        };
        Directory::in_memory(&config).unwrap()
    }

    fn register(dir: &Directory, username: &[u8], seed: u8) -> SigningKey {
        let owner = SigningKey::from_bytes(&[seed; 32]);
        let mk = owner.verifying_key().to_bytes();
        dir.register(username, &mk, &owner.sign(&mk).to_bytes()).unwrap();
        owner
    }

    #[test]
    fn test_register_once() {
        let dir = directory(2);
        let owner = register(&dir, b"alice", 1);
        let mk = owner.verifying_key().to_bytes();
        let again = dir.register(b"alice", &mk, &owner.sign(&mk).to_bytes());
        assert!(matches!(again, Err(Error::AlreadyRegistered(_))));
        assert_eq!(dir.lookup_master_key(b"alice").unwrap().value, mk);
    }

    #[test]
    fn test_register_rejects_bad_signature() {
        let dir = directory(1);
        let owner = SigningKey::from_bytes(&[2; 32]);
        let mk = owner.verifying_key().to_bytes();
        let err = dir.register(b"bob", &mk, &owner.sign(b"other").to_bytes()).unwrap_err();
        assert!(err.is_proof_failure());
        assert!(dir.lookup_master_key(b"bob").is_err());
    }

    fn append_key(dir: &Directory, username: &[u8], owner: &SigningKey, value: &[u8]) -> Result<u64> {
        dir.append(username, value, |position| {
            owner.sign(&signed_payload(value, position)).to_bytes().to_vec()
        })
    }

    #[test]
    fn test_public_key_at_position() {
        let dir = directory(1);
        let owner = register(&dir, b"carol", 4);
        let first = append_key(&dir, b"carol", &owner, b"k1").unwrap();
        let second = append_key(&dir, b"carol", &owner, b"k2").unwrap();
        assert!(second > first);

        // Nothing is served before the keys are sealed
        assert!(dir.lookup_public_key(b"carol", u64::MAX).is_err());
        dir.increment_update_epoch().unwrap();

        assert_eq!(dir.lookup_public_key(b"carol", second).unwrap().value, b"k2");
        assert_eq!(dir.lookup_public_key(b"carol", first).unwrap().value, b"k1");
        assert!(dir.lookup_public_key(b"dave", u64::MAX).is_err());

        let third = append_key(&dir, b"carol", &owner, b"k3").unwrap();
        assert_eq!(dir.lookup_public_key(b"carol", third).unwrap().value, b"k2");
    }

    #[test]
    fn test_append_requires_registration_and_owner_signature() {
        let dir = directory(2);
        let alice = register(&dir, b"alice", 5);
        dir.increment_update_epoch().unwrap();
        let before = dir.lookup_master_key(b"alice").unwrap();

        let mallory = SigningKey::from_bytes(&[6; 32]);
        let forged = mallory.verifying_key().to_bytes();

        let err = append_key(&dir, b"alice", &mallory, &forged).unwrap_err();
        assert!(err.is_proof_failure());
        assert!(matches!(
            append_key(&dir, b"mallory", &mallory, &forged),
            Err(Error::NotRegistered(_))
        ));
        assert!(matches!(
            dir.append(b"aliceMK", &forged, |_| mallory.sign(&forged).to_bytes().to_vec()),
            Err(Error::NotRegistered(_))
        ));

        // The master key and its proof still belong to alice
        dir.increment_update_epoch().unwrap();
        assert_eq!(dir.lookup_master_key(b"alice").unwrap(), before);
        let found = dir.lookup_with_proof(&master_key_identifier(b"alice")).unwrap();
        assert_eq!(found.record.value, alice.verifying_key().to_bytes());
        assert!(dir.lookup_public_key(b"alice", u64::MAX).is_err());
    }

    /// Fails every read of a public-key record
    struct UnreadablePublicKeys(MemoryStore);

    impl Storage for UnreadablePublicKeys {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            if key.ends_with(b"PK") {
                return Err(Error::Corruption("unreadable".into()));
            }
            self.0.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.0.put(key, value)
        }
    }

    #[test]
    fn test_failed_store_read_commits_nothing() {
        let dir = Directory::new(&Config::default(), Arc::new(UnreadablePublicKeys(MemoryStore::new()))).unwrap();
        let owner = register(&dir, b"grace", 7);
        let identifier = public_key_identifier(b"grace");
        let position = dir.next_position(&identifier);

        assert!(matches!(
            append_key(&dir, b"grace", &owner, b"device"),
            Err(Error::Corruption(_))
        ));
        assert_eq!(dir.next_position(&identifier), position);

        dir.increment_update_epoch().unwrap();
        let proof = dir.partitions[0].lock().existence_proof(&identifier).unwrap();
        assert!(proof.updates.iter().all(|p| !p.is_member()));
    }

    #[test]
    fn test_lookup_with_proof_validates() {
        let dir = directory(3);
        let owner = register(&dir, b"erin", 3);

        let identifier = public_key_identifier(b"erin");
        let position = append_key(&dir, b"erin", &owner, b"device").unwrap();

        // Not provable until sealed
        assert!(dir.lookup_with_proof(&identifier).is_err());
        dir.increment_update_epoch().unwrap();

        let found = dir.lookup_with_proof(&identifier).unwrap();
        assert_eq!(found.record.position, position);
        let claim = Claim::public_key(
            identifier,
            found.record.value,
            found.record.signature,
            found.record.position,
            owner.verifying_key(),
        );
        validate(&found.digest, &found.proof, &claim).unwrap();
    }

    #[test]
    fn test_routing_is_stable() {
        let dir = directory(4);
        let a = dir.partition_for(b"frankPK");
        assert_eq!(a, dir.partition_for(b"frankPK"));
        assert!(a < 4);
        assert!(dir.checkpoint(4).is_err());
    }
}
