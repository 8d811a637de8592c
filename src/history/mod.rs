//! Commitments to a partition's history
//!
//! - [`log`]: the append-only log over sealed update tries
//! - [`forest`]: the history forest over settled base-trie snapshots

pub mod forest;
pub mod log;

pub use forest::{verify_extension, ExtensionProof, ForestDigest, ForestNode, HistoryForest};
pub use log::{verify_consistency, CommitmentLog, ConsistencyProof, LogDigest, LogEntry};
