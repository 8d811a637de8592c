//! Unauthenticated storage for published values
//!
//! The tries only commit to content hashes. The values and signatures
//! themselves live in a plain key-value [`Storage`], keyed by identifier.

mod file_store;
mod memory;
mod record;

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use record::{encode_prepended, load_records, ValueRecord};

use crate::Result;

/// A byte-keyed store shared by every partition
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}
