//! Signed commands and the single-writer processor
//!
//! Every state change arrives as a [`SignedCommand`]: the caller's party id,
//! a per-caller nonce, the command, and an Ed25519 signature over the
//! canonical bytes of all three. The [`Processor`] checks the signature and
//! nonce, then runs the command against the registry. Commands either apply
//! completely or leave no trace, including the caller's nonce.
//!
//! # Example
//!
//! ```rust
//! use accord::clock::ManualClock;
//! use accord::crypto::Signer;
//! use accord::processor::{Command, Outcome, Processor, SignedCommand};
//! use std::sync::Arc;
//!
//! let owner = Signer::generate();
//! let alice = Signer::generate();
//! let bob = Signer::generate();
//! let mut processor = Processor::new(owner.party_id(), Arc::new(ManualClock::new(0)));
//!
//! let create = Command::CreateContract {
//!     party_a: alice.party_id(),
//!     party_b: bob.party_id(),
//!     expiry: 10_000,
//! };
//! let nonce = processor.next_nonce(&alice.party_id());
//! let signed = SignedCommand::sign(&alice, nonce, create).unwrap();
//! let receipt = processor.execute(signed).unwrap();
//! assert!(matches!(receipt.outcome, Outcome::Created(_)));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agreement::{
    Agreement, AgreementEvent, Message, MessageParams, PauseState, Verification,
};
use crate::clock::Clock;
use crate::crypto::{PartyId, SignatureBytes, Signer};
use crate::error::{AgreementError, AgreementResult};
use crate::registry::{AgreementId, Registry, RegistryEvent};

/// Domain tag mixed into every signed command
const COMMAND_DOMAIN: &[u8] = b"accord-command-v1";

/// Highest nonce a command may carry; `u64::MAX` is never accepted so the
/// next nonce always exists
pub const MAX_NONCE: u64 = u64::MAX - 1;

/// A state-changing operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Register a new agreement
    CreateContract {
        /// First party
        party_a: PartyId,
        /// Second party
        party_b: PartyId,
        /// Unix expiry
        expiry: u64,
    },
    /// Store the first batch of messages
    Initialize {
        /// Target agreement
        agreement: AgreementId,
        /// Messages in order
        messages: Vec<MessageParams>,
    },
    /// Append one message
    AddMessage {
        /// Target agreement
        agreement: AgreementId,
        /// New message
        message: MessageParams,
    },
    /// Replace the body at an existing slot
    UpdateMessage {
        /// Target agreement
        agreement: AgreementId,
        /// Slot and new body
        message: MessageParams,
    },
    /// Tombstone a live message
    Remove {
        /// Target agreement
        agreement: AgreementId,
        /// Exact message to remove
        message: MessageParams,
    },
    /// Toggle the caller's pause flag
    ManageReviewStatus {
        /// Target agreement
        agreement: AgreementId,
    },
    /// Approve as the caller
    Approve {
        /// Target agreement
        agreement: AgreementId,
    },
    /// Transfer registry administration
    SetOwner {
        /// Next owner
        new_owner: PartyId,
    },
}

/// A read-only request; needs no signature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    /// Resolve by pair and expiry
    GetAgreement {
        /// Either party
        party_a: PartyId,
        /// The other party
        party_b: PartyId,
        /// Unix expiry
        expiry: u64,
    },
    /// Every slot of a section
    GetSection {
        /// Target agreement
        agreement: AgreementId,
        /// Section number
        section: u32,
    },
    /// A single slot
    GetMessage {
        /// Target agreement
        agreement: AgreementId,
        /// Section number
        section: u32,
        /// Sub-section number
        sub_section: u32,
    },
    /// Verified and unexpired by the processor's clock
    IsValid {
        /// Target agreement
        agreement: AgreementId,
    },
    /// Either party paused
    IsPaused {
        /// Target agreement
        agreement: AgreementId,
    },
    /// The whole record
    Describe {
        /// Target agreement
        agreement: AgreementId,
    },
}

/// A command bound to its caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCommand {
    /// Claimed caller
    pub caller: PartyId,
    /// Strictly increasing per caller
    pub nonce: u64,
    /// The operation
    pub command: Command,
    /// Caller's signature over [`SignedCommand::canonical_bytes`]
    pub signature: SignatureBytes,
}

impl SignedCommand {
    /// Sign `command` as `signer`
    pub fn sign(signer: &Signer, nonce: u64, command: Command) -> AgreementResult<Self> {
        let caller = signer.party_id();
        let signature = signer.sign(&Self::canonical_bytes(&caller, nonce, &command)?);
        Ok(SignedCommand {
            caller,
            nonce,
            command,
            signature,
        })
    }

    /// Bytes covered by the signature.
    ///
    /// Domain tag, caller (32 bytes), nonce (8 bytes, little-endian), then
    /// the JSON form of the command prefixed by its length (4 bytes).
    pub fn canonical_bytes(
        caller: &PartyId,
        nonce: u64,
        command: &Command,
    ) -> AgreementResult<Vec<u8>> {
        let body = serde_json::to_vec(command)?;
        let body_len = u32::try_from(body.len()).map_err(|_| {
            AgreementError::InvalidInput(format!("command body of {} bytes", body.len()))
        })?;

        let mut bytes = Vec::with_capacity(COMMAND_DOMAIN.len() + 44 + body.len());
        bytes.extend_from_slice(COMMAND_DOMAIN);
        bytes.extend_from_slice(caller.as_bytes());
        bytes.extend_from_slice(&nonce.to_le_bytes());
        bytes.extend_from_slice(&body_len.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Check the signature against the claimed caller
    pub fn verify(&self) -> AgreementResult<()> {
        let bytes = Self::canonical_bytes(&self.caller, self.nonce, &self.command)?;
        self.caller.verify(&bytes, &self.signature)?;
        Ok(())
    }
}

/// Return value of a successful command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// New agreement id
    Created(AgreementId),
    /// Stored initial batch
    Initialized(Vec<Message>),
    /// Stored message
    Added(Message),
    /// Record before the update
    Updated(Message),
    /// Record that was removed
    Removed(Message),
    /// Caller's new pause flag
    ReviewStatus(PauseState),
    /// Verification flag after the approval
    Approved(Verification),
    /// Ownership moved
    OwnerSet,
}

/// Answer to a [`Query`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "answer", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Resolved id, if any
    Agreement(Option<AgreementId>),
    /// Section slots
    Section(Vec<Message>),
    /// One slot
    Message(Message),
    /// Validity flag
    Valid(bool),
    /// Pause flag
    Paused(bool),
    /// Whole record
    Record(Box<Agreement>),
}

/// Notification tagged with where it came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Notification {
    /// From one agreement
    Agreement {
        /// Emitting agreement
        agreement: AgreementId,
        /// The event
        event: AgreementEvent,
    },
    /// From the registry
    Registry {
        /// The event
        event: RegistryEvent,
    },
}

/// Outcome plus the notifications the command emitted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Return value
    pub outcome: Outcome,
    /// Emitted notifications in order
    pub notifications: Vec<Notification>,
}

/// Durable part of the processor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorState {
    /// Registry with every agreement
    pub registry: Registry,
    /// Last accepted nonce per caller
    pub nonces: BTreeMap<PartyId, u64>,
}

impl ProcessorState {
    /// Fresh state administered by `owner`
    pub fn new(owner: PartyId) -> Self {
        ProcessorState {
            registry: Registry::new(owner),
            nonces: BTreeMap::new(),
        }
    }

    /// Reject state whose stores disagree with their own message index
    pub fn check_integrity(&self) -> AgreementResult<()> {
        for id in self.registry.ids() {
            let faults = self.registry.agreement(id)?.store().audit();
            if let Some((section, sub_section)) = faults.first() {
                return Err(AgreementError::Storage(format!(
                    "agreement {id} is inconsistent at {section}:{sub_section} ({} faulty slots)",
                    faults.len()
                )));
            }
        }
        Ok(())
    }
}

/// Applies signed commands one at a time
pub struct Processor {
    state: ProcessorState,
    clock: Arc<dyn Clock>,
}

impl Processor {
    /// Fresh processor
    pub fn new(owner: PartyId, clock: Arc<dyn Clock>) -> Self {
        Self::from_state(ProcessorState::new(owner), clock)
    }

    /// Resume from persisted state
    pub fn from_state(state: ProcessorState, clock: Arc<dyn Clock>) -> Self {
        Processor { state, clock }
    }

    /// Current state, for persistence
    pub fn state(&self) -> &ProcessorState {
        &self.state
    }

    /// Give up the state
    pub fn into_state(self) -> ProcessorState {
        self.state
    }

    /// The registry
    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Lowest nonce `caller` may use next
    pub fn next_nonce(&self, caller: &PartyId) -> u64 {
        self.state
            .nonces
            .get(caller)
            .map_or(0, |last| last.saturating_add(1))
    }

    /// Authenticate and apply one command
    pub fn execute(&mut self, signed: SignedCommand) -> AgreementResult<Receipt> {
        if let Err(err) = signed.verify() {
            warn!(caller = %signed.caller.short(), "rejected command with bad signature");
            return Err(err);
        }
        if signed.nonce > MAX_NONCE {
            warn!(caller = %signed.caller.short(), "rejected command with exhausted nonce");
            return Err(AgreementError::NonceOutOfRange(signed.nonce));
        }
        if let Some(&last) = self.state.nonces.get(&signed.caller) {
            if signed.nonce <= last {
                warn!(
                    caller = %signed.caller.short(),
                    nonce = signed.nonce,
                    last,
                    "rejected replayed command"
                );
                return Err(AgreementError::ReplayedCommand {
                    nonce: signed.nonce,
                    last,
                });
            }
        }

        match self.apply(&signed.caller, signed.command) {
            Ok(receipt) => {
                self.state.nonces.insert(signed.caller, signed.nonce);
                debug!(caller = %signed.caller.short(), nonce = signed.nonce, "command applied");
                Ok(receipt)
            }
            Err(err) => {
                warn!(caller = %signed.caller.short(), error = %err, "command rolled back");
                Err(err)
            }
        }
    }

    fn apply(&mut self, caller: &PartyId, command: Command) -> AgreementResult<Receipt> {
        let registry = &mut self.state.registry;
        let (outcome, target) = match command {
            Command::CreateContract {
                party_a,
                party_b,
                expiry,
            } => {
                let id = registry.create_contract(party_a, party_b, expiry)?;
                (Outcome::Created(id), None)
            }
            Command::SetOwner { new_owner } => {
                registry.set_owner(caller, new_owner)?;
                (Outcome::OwnerSet, None)
            }
            Command::Initialize {
                agreement,
                messages,
            } => {
                let stored = registry
                    .agreement_mut(&agreement)?
                    .initialize(caller, &messages)?;
                (Outcome::Initialized(stored), Some(agreement))
            }
            Command::AddMessage { agreement, message } => {
                let added = registry
                    .agreement_mut(&agreement)?
                    .add_message(caller, &message)?;
                (Outcome::Added(added), Some(agreement))
            }
            Command::UpdateMessage { agreement, message } => {
                let previous = registry
                    .agreement_mut(&agreement)?
                    .update_message(caller, &message)?;
                (Outcome::Updated(previous), Some(agreement))
            }
            Command::Remove { agreement, message } => {
                let removed = registry.agreement_mut(&agreement)?.remove(caller, &message)?;
                (Outcome::Removed(removed), Some(agreement))
            }
            Command::ManageReviewStatus { agreement } => {
                let state = registry
                    .agreement_mut(&agreement)?
                    .manage_review_status(caller)?;
                (Outcome::ReviewStatus(state), Some(agreement))
            }
            Command::Approve { agreement } => {
                let verified = registry.agreement_mut(&agreement)?.approve(caller)?;
                (Outcome::Approved(verified), Some(agreement))
            }
        };

        let mut notifications: Vec<Notification> = registry
            .take_events()
            .into_iter()
            .map(|event| Notification::Registry { event })
            .collect();
        if let Some(agreement) = target {
            let events = registry.agreement_mut(&agreement)?.take_events();
            notifications.extend(
                events
                    .into_iter()
                    .map(|event| Notification::Agreement { agreement, event }),
            );
        }

        Ok(Receipt {
            outcome,
            notifications,
        })
    }

    /// Answer a read-only query
    pub fn query(&self, query: &Query) -> AgreementResult<Answer> {
        let registry = &self.state.registry;
        Ok(match query {
            Query::GetAgreement {
                party_a,
                party_b,
                expiry,
            } => Answer::Agreement(registry.get_agreement(party_a, party_b, *expiry)),
            Query::GetSection { agreement, section } => Answer::Section(
                registry.agreement(agreement)?.get_section(*section).to_vec(),
            ),
            Query::GetMessage {
                agreement,
                section,
                sub_section,
            } => Answer::Message(
                registry
                    .agreement(agreement)?
                    .get_message(*section, *sub_section)?,
            ),
            Query::IsValid { agreement } => {
                Answer::Valid(registry.agreement(agreement)?.is_valid(self.clock.as_ref()))
            }
            Query::IsPaused { agreement } => {
                Answer::Paused(registry.agreement(agreement)?.is_paused())
            }
            Query::Describe { agreement } => {
                Answer::Record(Box::new(registry.agreement(agreement)?.clone()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::ContentHash;

    struct Harness {
        processor: Processor,
        clock: ManualClock,
        owner: Signer,
        alice: Signer,
        bob: Signer,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::new(1_000);
            let owner = Signer::from_seed(&[9u8; 32]);
            Harness {
                processor: Processor::new(owner.party_id(), Arc::new(clock.clone())),
                clock,
                owner,
                alice: Signer::from_seed(&[1u8; 32]),
                bob: Signer::from_seed(&[2u8; 32]),
            }
        }

        fn run(&mut self, who: &Signer, command: Command) -> AgreementResult<Receipt> {
            let nonce = self.processor.next_nonce(&who.party_id());
            self.processor.execute(SignedCommand::sign(who, nonce, command)?)
        }

        fn create(&mut self) -> AgreementId {
            let command = Command::CreateContract {
                party_a: self.alice.party_id(),
                party_b: self.bob.party_id(),
                expiry: 3_000,
            };
            let alice = self.alice.clone();
            match self.run(&alice, command).unwrap().outcome {
                Outcome::Created(id) => id,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    fn clause(section: u32, sub_section: u32) -> MessageParams {
        let text = format!("section {section} clause {sub_section}");
        MessageParams::new(section, sub_section, ContentHash::digest(text.as_bytes())).unwrap()
    }

    #[test]
    fn test_create_emits_registry_notification() {
        let mut h = Harness::new();
        let bob = h.bob.clone();
        let receipt = h
            .run(
                &bob,
                Command::CreateContract {
                    party_a: h.alice.party_id(),
                    party_b: bob.party_id(),
                    expiry: 3_000,
                },
            )
            .unwrap();
        let Outcome::Created(id) = receipt.outcome else {
            panic!("expected Created");
        };
        assert!(matches!(
            receipt.notifications.as_slice(),
            [Notification::Registry { event: RegistryEvent::Created { id: got, .. } }] if *got == id
        ));

        let answer = h
            .processor
            .query(&Query::GetAgreement {
                party_a: bob.party_id(),
                party_b: h.alice.party_id(),
                expiry: 3_000,
            })
            .unwrap();
        assert_eq!(answer, Answer::Agreement(Some(id)));
    }

    #[test]
    fn test_tampered_command_is_rejected() {
        let mut h = Harness::new();
        let id = h.create();

        let mut signed = SignedCommand::sign(&h.alice, 5, Command::Approve { agreement: id }).unwrap();
        signed.caller = h.bob.party_id();
        let err = h.processor.execute(signed).unwrap_err();
        assert!(matches!(err, AgreementError::Crypto(_)));

        let mut signed = SignedCommand::sign(&h.alice, 5, Command::Approve { agreement: id }).unwrap();
        signed.nonce = 6;
        assert!(h.processor.execute(signed).is_err());
    }

    #[test]
    fn test_replayed_nonce_is_rejected() {
        let mut h = Harness::new();
        let id = h.create();
        let messages = vec![clause(1, 0)];

        let signed = SignedCommand::sign(
            &h.alice,
            h.processor.next_nonce(&h.alice.party_id()),
            Command::Initialize {
                agreement: id,
                messages,
            },
        )
        .unwrap();
        h.processor.execute(signed.clone()).unwrap();
        assert_eq!(
            h.processor.execute(signed),
            Err(AgreementError::ReplayedCommand { nonce: 1, last: 1 })
        );
    }

    #[test]
    fn test_failed_command_keeps_nonce() {
        let mut h = Harness::new();
        let id = h.create();
        let before = h.processor.next_nonce(&h.alice.party_id());

        let alice = h.alice.clone();
        assert_eq!(
            h.run(&alice, Command::Approve { agreement: id }),
            Err(AgreementError::NotInitialized)
        );
        assert_eq!(h.processor.next_nonce(&h.alice.party_id()), before);
    }

    #[test]
    fn test_outsider_cannot_drive_agreement() {
        let mut h = Harness::new();
        let id = h.create();
        let owner = h.owner.clone();
        assert_eq!(
            h.run(
                &owner,
                Command::Initialize {
                    agreement: id,
                    messages: vec![clause(1, 0)]
                }
            ),
            Err(AgreementError::NotAParty(owner.party_id()))
        );
    }

    #[test]
    fn test_lifecycle_through_commands() {
        let mut h = Harness::new();
        let id = h.create();
        let (alice, bob) = (h.alice.clone(), h.bob.clone());

        h.run(
            &alice,
            Command::Initialize {
                agreement: id,
                messages: vec![clause(1, 0), clause(1, 1)],
            },
        )
        .unwrap();

        let receipt = h
            .run(
                &bob,
                Command::UpdateMessage {
                    agreement: id,
                    message: MessageParams::new(1, 1, ContentHash::digest(b"amended")).unwrap(),
                },
            )
            .unwrap();
        assert_eq!(receipt.outcome, Outcome::Updated(Message::new(&clause(1, 1), 1)));

        h.run(&alice, Command::Approve { agreement: id }).unwrap();
        assert_eq!(
            h.processor.query(&Query::IsValid { agreement: id }).unwrap(),
            Answer::Valid(false)
        );

        let receipt = h.run(&bob, Command::Approve { agreement: id }).unwrap();
        assert_eq!(receipt.outcome, Outcome::Approved(Verification::Verified));
        assert_eq!(
            receipt.notifications.last(),
            Some(&Notification::Agreement {
                agreement: id,
                event: AgreementEvent::Verified
            })
        );
        assert_eq!(
            h.processor.query(&Query::IsValid { agreement: id }).unwrap(),
            Answer::Valid(true)
        );

        h.clock.set(3_001);
        assert_eq!(
            h.processor.query(&Query::IsValid { agreement: id }).unwrap(),
            Answer::Valid(false)
        );
    }

    #[test]
    fn test_queries_report_missing_agreement() {
        let h = Harness::new();
        let missing = AgreementId(ContentHash::digest(b"missing"));
        assert_eq!(
            h.processor.query(&Query::IsPaused { agreement: missing }),
            Err(AgreementError::AgreementNotFound)
        );
    }

    #[test]
    fn test_set_owner_command() {
        let mut h = Harness::new();
        let (owner, alice) = (h.owner.clone(), h.alice.clone());

        assert_eq!(
            h.run(&alice, Command::SetOwner { new_owner: alice.party_id() }),
            Err(AgreementError::NotOwner(alice.party_id()))
        );
        let receipt = h
            .run(&owner, Command::SetOwner { new_owner: alice.party_id() })
            .unwrap();
        assert_eq!(receipt.outcome, Outcome::OwnerSet);
        assert_eq!(h.processor.registry().owner(), alice.party_id());
    }

    #[test]
    fn test_signed_command_serde() {
        let alice = Signer::from_seed(&[1u8; 32]);
        let signed = SignedCommand::sign(
            &alice,
            3,
            Command::SetOwner {
                new_owner: alice.party_id(),
            },
        )
        .unwrap();
        let json = serde_json::to_string(&signed).unwrap();
        let restored: SignedCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, signed);
        assert!(restored.verify().is_ok());
    }

    #[test]
    fn test_canonical_bytes_layout() {
        let alice = Signer::from_seed(&[1u8; 32]);
        let command = Command::SetOwner {
            new_owner: alice.party_id(),
        };
        let body = serde_json::to_vec(&command).unwrap();
        let bytes = SignedCommand::canonical_bytes(&alice.party_id(), 7, &command).unwrap();

        let (domain, rest) = bytes.split_at(COMMAND_DOMAIN.len());
        assert_eq!(domain, COMMAND_DOMAIN);
        assert_eq!(&rest[..32], alice.party_id().as_bytes());
        assert_eq!(&rest[32..40], &7u64.to_le_bytes());
        assert_eq!(&rest[40..44], &(body.len() as u32).to_le_bytes());
        assert_eq!(&rest[44..], body.as_slice());
    }

    #[test]
    fn test_last_nonce_value_is_refused() {
        let mut h = Harness::new();
        let owner = h.owner.clone();
        let set_owner = Command::SetOwner {
            new_owner: owner.party_id(),
        };

        let signed = SignedCommand::sign(&owner, u64::MAX, set_owner.clone()).unwrap();
        assert_eq!(
            h.processor.execute(signed),
            Err(AgreementError::NonceOutOfRange(u64::MAX))
        );
        assert_eq!(h.processor.next_nonce(&owner.party_id()), 0);

        // The highest usable nonce is accepted and still leaves a next one
        let signed = SignedCommand::sign(&owner, MAX_NONCE, set_owner.clone()).unwrap();
        h.processor.execute(signed).unwrap();
        assert_eq!(h.processor.next_nonce(&owner.party_id()), u64::MAX);
        let signed = SignedCommand::sign(&owner, u64::MAX, set_owner).unwrap();
        assert_eq!(
            h.processor.execute(signed),
            Err(AgreementError::NonceOutOfRange(u64::MAX))
        );

        // Other callers are unaffected
        let id = h.create();
        assert_eq!(h.processor.registry().len(), 1);
        assert!(h.processor.registry().agreement(&id).is_ok());
    }

    #[test]
    fn test_exhausted_nonce_in_loaded_state() {
        let mut h = Harness::new();
        let owner = h.owner.party_id();
        h.processor.state.nonces.insert(owner, u64::MAX);
        assert_eq!(h.processor.next_nonce(&owner), u64::MAX);
    }
}
