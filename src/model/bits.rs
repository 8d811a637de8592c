//! Bit-string keys
//!
//! Trie keys are sequences of bits. They are stored one bit per byte so
//! labels can be sliced at any bit offset without shifting.

use super::hash::{Domain, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A sequence of bits, each stored as a `0` or `1` byte
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Bits(Vec<u8>);

impl Bits {
    /// The empty bit string (the root label)
    pub fn empty() -> Self {
        Bits(Vec::new())
    }

    /// Expand bytes into bits, most significant bit first
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bits = Vec::with_capacity(bytes.len() * 8);
        for byte in bytes {
            for i in 0..8 {
                bits.push((byte >> (7 - i)) & 1);
            }
        }
        Bits(bits)
    }

    /// Build from a slice of bit values; anything non-zero counts as `1`
    pub fn from_bits(bits: &[u8]) -> Self {
        Bits(bits.iter().map(|b| u8::from(*b != 0)).collect())
    }

    /// Parse a string of `0`/`1` characters
    pub fn parse(s: &str) -> Option<Self> {
        s.chars()
            .map(|c| match c {
                '0' => Some(0),
                '1' => Some(1),
                _ => None,
            })
            .collect::<Option<Vec<u8>>>()
            .map(Bits)
    }

    /// The trie key of an application identifier: the bits of its hash
    pub fn for_identifier(identifier: &[u8]) -> Self {
        Bits::from_bytes(Hash::digest_parts(Domain::Identifier, &[identifier]).as_bytes())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bit at position `i`
    pub fn bit(&self, i: usize) -> u8 {
        self.0[i]
    }

    /// First bit, if any. Decides which side of its parent a node hangs on.
    pub fn first(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Bits `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> Bits {
        Bits(self.0[start..end].to_vec())
    }

    /// Bits from `start` to the end
    pub fn suffix(&self, start: usize) -> Bits {
        Bits(self.0[start..].to_vec())
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Length of the shared prefix of `self[offset..]` and `other`
    pub fn common_prefix_len(&self, offset: usize, other: &[u8]) -> usize {
        self.0[offset..]
            .iter()
            .zip(other.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    pub fn extend_from(&mut self, other: &Bits) {
        self.0.extend_from_slice(&other.0);
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() > 16 {
            write!(f, "Bits({}..; {})", self.slice(0, 16), self.0.len())
        } else {
            write!(f, "Bits({})", self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_msb_first() {
        let bits = Bits::from_bytes(&[0b1000_0001]);
        assert_eq!(bits.to_string(), "10000001");
    }

    #[test]
    fn test_identifier_key_is_256_bits() {
        assert_eq!(Bits::for_identifier(b"alice").len(), 256);
        assert_ne!(Bits::for_identifier(b"alice"), Bits::for_identifier(b"bob"));
    }

    #[test]
    fn test_parse_rejects_other_chars() {
        assert!(Bits::parse("0102").is_none());
        assert_eq!(Bits::parse("011").unwrap().as_slice(), &[0, 1, 1]);
    }

    #[test]
    fn test_common_prefix_len() {
        let key = Bits::parse("00110").unwrap();
        assert_eq!(key.common_prefix_len(1, &[0, 1, 0]), 2);
        assert_eq!(key.common_prefix_len(0, &[1]), 0);
    }
}
