//! # Accord
//!
//! Two-party agreement records with dual approval and pause control.
//!
//! ## Features
//!
//! - **Sectioned message store** holding content hashes, with tombstoned removals
//! - **Lifecycle rules**: edits only while unverified and unpaused, verified on the second approval
//! - **Registry** that finds an agreement by its two parties in either order plus expiry
//! - **Signed commands** so every caller is authenticated by an Ed25519 key
//! - **Single-writer service** that serializes concurrent callers
//!
//! ## Quick Start
//!
//! ```rust
//! use accord::agreement::MessageParams;
//! use accord::{ContentHash, Registry, Signer};
//!
//! let owner = Signer::generate().party_id();
//! let alice = Signer::generate().party_id();
//! let bob = Signer::generate().party_id();
//!
//! let mut registry = Registry::new(owner);
//! let id = registry.create_contract(alice, bob, 2_000_000_000).unwrap();
//! assert_eq!(registry.get_agreement(&bob, &alice, 2_000_000_000), Some(id));
//!
//! let agreement = registry.agreement_mut(&id).unwrap();
//! let clause = MessageParams::new(1, 0, ContentHash::digest(b"deliver by March")).unwrap();
//! agreement.initialize(&alice, &[clause]).unwrap();
//! agreement.approve(&alice).unwrap();
//! agreement.approve(&bob).unwrap();
//! assert!(agreement.is_valid_at(1_900_000_000));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │          CLI  |  ServiceHandle callers      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              EXECUTION LAYER                │
//! │  Request queue | Processor | State file     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               RECORD LAYER                  │
//! │  Registry | Agreement lifecycle | Store     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │          Ed25519  |  BLAKE3                 │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agreement;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod processor;
pub mod registry;
pub mod service;
pub mod snapshot;

// Re-export main types at crate root
pub use agreement::{Agreement, AgreementEvent, Message, MessageParams};
pub use crypto::{ContentHash, CryptoError, CryptoResult, PartyId, SignatureBytes, Signer};
pub use error::{AgreementError, AgreementResult, ErrorKind};
pub use processor::{Command, Processor, Query, SignedCommand};
pub use registry::{AgreementId, Registry};
