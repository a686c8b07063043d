//! Cryptographic error types

use thiserror::Error;

/// Errors raised while parsing or checking keys, signatures and content hashes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The provided key has an invalid length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// The provided signature has an invalid length
    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// A content hash was not exactly 32 bytes
    #[error("Invalid content hash length: expected {expected}, got {actual}")]
    InvalidHashLength {
        /// Expected digest length in bytes
        expected: usize,
        /// Actual digest length in bytes
        actual: usize,
    },

    /// Input was not valid hexadecimal
    #[error("Invalid hex encoding")]
    InvalidHex,

    /// Signature verification failed - the signature is invalid
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// The public key is not a valid Ed25519 point
    #[error("Invalid public key format")]
    InvalidPublicKey,

    /// The stored public half does not belong to the secret half
    #[error("Invalid secret key format")]
    InvalidSecretKey,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
