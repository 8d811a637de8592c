//! Values stored in trie leaves

use super::hash::{Domain, Hash};
use serde::{Deserialize, Serialize};

/// One published value under a key: the content hash and the position the
/// partition assigned to the append
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub hash: Hash,
    pub position: u64,
}

impl ValueEntry {
    pub fn new(hash: Hash, position: u64) -> Self {
        ValueEntry { hash, position }
    }
}

/// Hash committing to an append: who, what, the owner's signature and where
/// in the partition's sequence it landed
pub fn content_hash(identifier: &[u8], value: &[u8], signature: &[u8], position: u64) -> Hash {
    Hash::digest_parts(
        Domain::Content,
        &[identifier, value, signature, &position.to_be_bytes()],
    )
}

/// Bytes the owner signs for a public key: `value ‖ position`
pub fn signed_payload(value: &[u8], position: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(value.len() + 8);
    payload.extend_from_slice(value);
    payload.extend_from_slice(&position.to_be_bytes());
    payload
}

/// Identifier a user's master key is published under: `username ‖ "MK"`
pub fn master_key_identifier(username: &[u8]) -> Vec<u8> {
    [username, b"MK"].concat()
}

/// Identifier a user's public keys are published under: `username ‖ "PK"`
pub fn public_key_identifier(username: &[u8]) -> Vec<u8> {
    [username, b"PK"].concat()
}
