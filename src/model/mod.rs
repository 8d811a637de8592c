//! Core data types: hashes, bit-string keys and leaf values

mod bits;
mod hash;
mod value;

pub use bits::Bits;
pub use hash::{Domain, Hash};
pub use value::{
    content_hash, master_key_identifier, public_key_identifier, signed_payload, ValueEntry,
};
