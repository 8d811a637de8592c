//! Error types for keytrie

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for keytrie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which part of a composite proof failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofSource {
    /// The base-trie proof at this index of the existence proof
    BaseTrie(usize),
    /// The sealed update trie at this index of the query side
    UpdateTrie(usize),
    /// A single trie proof checked on its own
    Trie,
    /// A commitment-log consistency proof
    Log,
    /// A history-forest extension proof
    History,
    /// The verification-epoch hash chain
    Chain,
    /// The owner's signature over the value
    Signature,
}

impl fmt::Display for ProofSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofSource::BaseTrie(i) => write!(f, "base trie {}", i),
            ProofSource::UpdateTrie(i) => write!(f, "update trie {}", i),
            ProofSource::Trie => write!(f, "trie"),
            ProofSource::Log => write!(f, "update log"),
            ProofSource::History => write!(f, "history forest"),
            ProofSource::Chain => write!(f, "hash chain"),
            ProofSource::Signature => write!(f, "signature"),
        }
    }
}

/// Errors that can occur in keytrie operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid proof ({part}): {reason}")]
    ProofInvalid { part: ProofSource, reason: String },

    #[error("Epoch {requested} has not occurred yet (current epoch is {current})")]
    EpochNotYetOccurred { requested: u64, current: u64 },

    #[error("Structural invariant violated: {0}")]
    StructuralInvariant(String),

    #[error("Cannot insert into a sealed trie")]
    Sealed,

    #[error("Key length mismatch: expected {expected} bits, found {found}")]
    KeyLength { expected: usize, found: usize },

    #[error("History forest is full ({capacity} entries)")]
    HistoryFull { capacity: u64 },

    #[error("Invalid size range: old size {old} is past new size {new}")]
    InvalidRange { old: u64, new: u64 },

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Not registered: {0}")]
    NotRegistered(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a proof failure
    pub fn invalid(part: ProofSource, reason: impl Into<String>) -> Self {
        Error::ProofInvalid {
            part,
            reason: reason.into(),
        }
    }

    /// Re-attribute a proof failure to the sub-proof that produced it
    pub fn at(self, part: ProofSource) -> Self {
        match self {
            Error::ProofInvalid { reason, .. } => Error::ProofInvalid { part, reason },
            other => other,
        }
    }

    /// True for failures a client must treat as a security event
    pub fn is_proof_failure(&self) -> bool {
        matches!(self, Error::ProofInvalid { .. })
    }
}
