//! Agreement error types
//!
//! Every precondition failure aborts the invocation. Each condition has its
//! own variant so callers and tests can tell them apart; [`ErrorKind`]
//! groups them into the coarse categories a caller usually cares about.

use thiserror::Error;

use crate::crypto::{CryptoError, PartyId};

/// Coarse category of an [`AgreementError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller is not a party, or not the registry owner
    Authorization,
    /// Operation not allowed in the current lifecycle phase
    Phase,
    /// Message store integrity or lookup failure
    Integrity,
    /// A party tried to approve twice
    Reentry,
    /// Registry creation or lookup failure
    Registry,
    /// Bad key, signature, hash or replayed command
    Crypto,
    /// State file or configuration could not be read or written
    Storage,
    /// Malformed caller input
    Input,
    /// The request queue is gone
    Service,
}

/// Errors raised by agreement, registry and processor operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgreementError {
    /// Caller is neither party A nor party B
    #[error("{0:?} is not a party to this agreement")]
    NotAParty(PartyId),

    /// Caller is not the registry owner
    #[error("{0:?} is not the registry owner")]
    NotOwner(PartyId),

    /// Agreement is verified and no longer accepts this operation
    #[error("Agreement is already verified")]
    AlreadyVerified,

    /// A party has paused the agreement
    #[error("Agreement is paused for review")]
    Paused,

    /// Initialize was already run
    #[error("Agreement is already initialized")]
    AlreadyInitialized,

    /// Operation needs at least one message in the index
    #[error("Agreement has not been initialized")]
    NotInitialized,

    /// The exact message already occupies its slot
    #[error("Message already exists at section {section}, sub-section {sub_section}")]
    DuplicateMessage {
        /// Section number
        section: u32,
        /// Sub-section number
        sub_section: u32,
    },

    /// No matching live message at the slot
    #[error("No matching message at section {section}, sub-section {sub_section}")]
    MessageNotFound {
        /// Section number
        section: u32,
        /// Sub-section number
        sub_section: u32,
    },

    /// Sub-section is past the end of its section
    #[error("Sub-section {sub_section} out of range for section {section} (length {len})")]
    SubSectionOutOfRange {
        /// Section number
        section: u32,
        /// Requested sub-section
        sub_section: u32,
        /// Current length of the section
        len: usize,
    },

    /// New messages must land at the next free position of their section
    #[error("Section {section} expects sub-section {expected}, got {actual}")]
    SlotMismatch {
        /// Section number
        section: u32,
        /// Next free position
        expected: u32,
        /// Requested sub-section
        actual: u32,
    },

    /// Section or sub-section does not fit in 24 bits
    #[error("Section address {0} exceeds the 24-bit limit")]
    SectionOutOfRange(u32),

    /// The caller has already approved
    #[error("{0:?} has already approved")]
    AlreadyApproved(PartyId),

    /// Both party slots name the same identity
    #[error("An agreement needs two distinct parties")]
    IdenticalParties,

    /// An agreement for this pair and expiry is already registered
    #[error("An agreement for this pair and expiry already exists")]
    AgreementExists,

    /// No agreement with the given id
    #[error("Agreement not found")]
    AgreementNotFound,

    /// Command nonce was not greater than the caller's last one
    #[error("Replayed command: nonce {nonce} is not above {last}")]
    ReplayedCommand {
        /// Nonce on the rejected command
        nonce: u64,
        /// Last accepted nonce for the caller
        last: u64,
    },

    /// Command nonce is past the highest usable value
    #[error("Nonce {0} is out of range")]
    NonceOutOfRange(u64),

    /// Key, signature or hash failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Persistence or configuration failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed input that never reached the agreement
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The processor task stopped before answering
    #[error("Agreement service is not running")]
    ServiceStopped,
}

impl AgreementError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAParty(_) | Self::NotOwner(_) => ErrorKind::Authorization,
            Self::AlreadyVerified
            | Self::Paused
            | Self::AlreadyInitialized
            | Self::NotInitialized => ErrorKind::Phase,
            Self::DuplicateMessage { .. }
            | Self::MessageNotFound { .. }
            | Self::SubSectionOutOfRange { .. }
            | Self::SlotMismatch { .. }
            | Self::SectionOutOfRange(_) => ErrorKind::Integrity,
            Self::AlreadyApproved(_) => ErrorKind::Reentry,
            Self::IdenticalParties | Self::AgreementExists | Self::AgreementNotFound => {
                ErrorKind::Registry
            }
            Self::ReplayedCommand { .. } | Self::NonceOutOfRange(_) | Self::Crypto(_) => {
                ErrorKind::Crypto
            }
            Self::Storage(_) => ErrorKind::Storage,
            Self::InvalidInput(_) => ErrorKind::Input,
            Self::ServiceStopped => ErrorKind::Service,
        }
    }
}

impl From<std::io::Error> for AgreementError {
    fn from(err: std::io::Error) -> Self {
        AgreementError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AgreementError {
    fn from(err: serde_json::Error) -> Self {
        AgreementError::Storage(err.to_string())
    }
}

/// Result type for agreement operations
pub type AgreementResult<T> = Result<T, AgreementError>;
