//! Content hashing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fixed-size content digest. `EMPTY` is the canonical hash of the empty
/// byte sequence and marks logically-deleted documents (spec invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl ContentHash {
    /// The hash of the empty byte sequence. Computed directly rather than
    /// hardcoded so the invariant "EMPTY is the hash of empty bytes" holds by
    /// construction.
    pub fn empty() -> Self {
        Self::of(&[])
    }
}
