//! Value records kept per identifier, newest first

use super::Storage;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A published value as the owner submitted it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub position: u64,
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
}

/// All records under `identifier`, newest first
pub fn load_records(store: &dyn Storage, identifier: &[u8]) -> Result<Vec<ValueRecord>> {
    match store.get(identifier)? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(Vec::new()),
    }
}

/// Serialized record list with `record` in front of `records`
pub fn encode_prepended(mut records: Vec<ValueRecord>, record: ValueRecord) -> Result<Vec<u8>> {
    records.insert(0, record);
    Ok(bincode::serialize(&records)?)
}
