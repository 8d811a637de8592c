//! # keytrie
//!
//! A key-transparency directory built on authenticated prefix tries.
//!
//! The directory maps identifiers to signed values and lets untrusted
//! clients and a semi-trusted auditor check that what the server returns is
//! what it publishes, and that it only ever adds to what it published.
//!
//! ## Core Concepts
//!
//! - **Base trie**: a persistent compressed binary trie over identifier
//!   hashes, snapshotted once per verification period
//! - **Update tries**: small sealed tries, one per update epoch, that make
//!   fresh appends provable before the next snapshot
//! - **Commitment log**: an append-only log of sealed-trie roots with
//!   consistency proofs
//! - **History forest**: optional record of every settled snapshot
//! - **Digest**: the roots a client trusts; every proof is checked against it
//!
//! ## Example
//!
//! ```ignore
//! use keytrie::{Config, Directory};
//!
//! let directory = Directory::in_memory(&Config::default())?;
//! directory.register(b"alice", &master_key, &self_signature)?;
//! directory.increment_update_epoch()?;
//! let lookup = directory.lookup_with_proof(b"aliceMK")?;
//! keytrie::validate::validate(&lookup.digest, &lookup.proof, &claim)?;
//! ```

pub mod auditor;
pub mod config;
pub mod directory;
pub mod history;
pub mod model;
pub mod partition;
pub mod store;
pub mod trie;
pub mod validate;

mod error;

pub use auditor::{Auditor, Verdict};
pub use config::Config;
pub use directory::{Directory, EpochDriver, Lookup};
pub use error::{Error, ProofSource, Result};
pub use model::{Bits, Hash, ValueEntry};
pub use partition::{CheckpointProof, Digest, ExistenceProof, Partition, PartitionKind};
pub use store::{FileStore, MemoryStore, Storage, ValueRecord};
pub use validate::Claim;

/// Store file format version
pub const VERSION: u32 = 1;

/// Magic bytes for store file identification
pub const MAGIC: &[u8; 8] = b"KEYTRIE\0";
