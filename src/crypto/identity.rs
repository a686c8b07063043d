//! Ed25519 party identities
//!
//! A party to an agreement is named by its Ed25519 verifying key. Commands
//! are signed with the matching [`Signer`] so the processor can tell which
//! party is calling.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Size of a party id in bytes
pub const PARTY_ID_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Public identity of a party.
///
/// Ordering is byte-lexicographic; the registry relies on it to put two
/// parties into canonical order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartyId(pub [u8; PARTY_ID_SIZE]);

impl PartyId {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; PARTY_ID_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PARTY_ID_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(PartyId(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PARTY_ID_SIZE] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    /// Short prefix used in log lines
    pub fn short(&self) -> String {
        self.to_hex()[..16].to_string()
    }

    /// Verify a signature made by this party
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;

        verifying_key
            .verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PartyId({}...)", self.short())
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for PartyId {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PartyId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PartyId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

// Arrays over 32 bytes don't derive serde, so go through hex
impl Serialize for SignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SIGNATURE_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidSignatureLength {
                    expected: SIGNATURE_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(SignatureBytes(arr))
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// Keypair a party uses to sign commands.
///
/// The secret key is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Signer {
    #[zeroize(skip)]
    party_id: PartyId,
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl Signer {
    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_signing_key(&SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        Signer {
            party_id: PartyId(signing_key.verifying_key().to_bytes()),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// The public identity of this signer
    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        SignatureBytes(signing_key.sign(message).to_bytes())
    }

    /// Export as `secret || public` for the identity file.
    ///
    /// WARNING: this exposes the secret key.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE + PARTY_ID_SIZE] {
        let mut bytes = [0u8; SECRET_KEY_SIZE + PARTY_ID_SIZE];
        bytes[..SECRET_KEY_SIZE].copy_from_slice(&self.secret_key);
        bytes[SECRET_KEY_SIZE..].copy_from_slice(&self.party_id.0);
        bytes
    }

    /// Import the `secret || public` form, rejecting a mismatched public half
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE + PARTY_ID_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE + PARTY_ID_SIZE,
                actual: bytes.len(),
            });
        }

        let mut secret_key = [0u8; SECRET_KEY_SIZE];
        secret_key.copy_from_slice(&bytes[..SECRET_KEY_SIZE]);

        let signer = Self::from_seed(&secret_key);
        secret_key.zeroize();

        if signer.party_id.0[..] != bytes[SECRET_KEY_SIZE..] {
            return Err(CryptoError::InvalidSecretKey);
        }
        Ok(signer)
    }
}

impl Clone for Signer {
    fn clone(&self) -> Self {
        Signer {
            party_id: self.party_id,
            secret_key: self.secret_key,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("party_id", &self.party_id)
            .finish_non_exhaustive()
    }
}
