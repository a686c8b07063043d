//! BLAKE3 content hashes
//!
//! Agreement bodies are stored as 32-byte digests computed by the caller.
//! The all-zero digest marks a removed (tombstoned) slot.

use serde::{Deserialize, Serialize};

use super::error::{CryptoError, CryptoResult};

/// Size of a content hash in bytes
pub const HASH_SIZE: usize = 32;

/// A 32-byte content digest
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; HASH_SIZE]);

impl ContentHash {
    /// Tombstone value
    pub const ZERO: ContentHash = ContentHash([0u8; HASH_SIZE]);

    /// Hash raw content with BLAKE3
    pub fn digest(data: &[u8]) -> Self {
        ContentHash(blake3::hash(data).into())
    }

    /// Keyed derivation under a context string
    pub fn derive(context: &str, material: &[u8]) -> Self {
        ContentHash(blake3::derive_key(context, material))
    }

    /// Whether this is the tombstone value
    pub fn is_zero(&self) -> bool {
        constant_time_eq(&self.0, &Self::ZERO.0)
    }

    /// Check raw content against this digest
    pub fn matches(&self, data: &[u8]) -> bool {
        constant_time_eq(&Self::digest(data).0, &self.0)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidHashLength {
                expected: HASH_SIZE,
                actual: bytes.len(),
            })?;
        Ok(ContentHash(arr))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for ContentHash {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; HASH_SIZE]> for ContentHash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        ContentHash(bytes)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Constant-time comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
