//! Cryptographic primitives for Accord
//!
//! - `identity`: Ed25519 party ids and command signing
//! - `hash`: BLAKE3 content hashes and keyed derivation

pub mod error;
pub mod hash;
pub mod identity;

pub use error::{CryptoError, CryptoResult};
pub use hash::{ContentHash, HASH_SIZE};
pub use identity::{PartyId, SignatureBytes, Signer};
