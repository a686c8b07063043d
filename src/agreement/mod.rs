//! Two-party agreement records
//!
//! An [`Agreement`] holds a sectioned message store guarded by a small
//! lifecycle: only its two parties may call it, content can change only
//! while it is unverified and neither party has paused it, and it becomes
//! verified the moment the second party approves.
//!
//! # Example
//!
//! ```rust
//! use accord::agreement::{Agreement, MessageParams};
//! use accord::crypto::{ContentHash, Signer};
//!
//! let alice = Signer::generate().party_id();
//! let bob = Signer::generate().party_id();
//! let mut agreement = Agreement::new(alice, bob, 2_000_000_000).unwrap();
//!
//! let clause = MessageParams::new(1, 0, ContentHash::digest(b"Bob pays 100")).unwrap();
//! agreement.initialize(&alice, &[clause]).unwrap();
//!
//! agreement.approve(&alice).unwrap();
//! agreement.approve(&bob).unwrap();
//! assert!(agreement.is_valid_at(1_900_000_000));
//! ```

mod event;
mod store;
mod types;

pub use event::AgreementEvent;
pub use store::MessageStore;
pub use types::{
    Approval, Message, MessageParams, PauseState, Side, Verification, MAX_SECTION,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::crypto::PartyId;
use crate::error::{AgreementError, AgreementResult};

/// A single agreement between two parties
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    party_a: PartyId,
    party_b: PartyId,
    expiry: u64,
    approved_a: Approval,
    approved_b: Approval,
    pause_a: PauseState,
    pause_b: PauseState,
    verified: Verification,
    store: MessageStore,
    /// Notifications not yet collected by the caller
    #[serde(skip)]
    pending: Vec<AgreementEvent>,
}

impl Agreement {
    /// New record with every flag at its default
    pub fn new(party_a: PartyId, party_b: PartyId, expiry: u64) -> AgreementResult<Self> {
        if party_a == party_b {
            return Err(AgreementError::IdenticalParties);
        }
        Ok(Agreement {
            party_a,
            party_b,
            expiry,
            approved_a: Approval::default(),
            approved_b: Approval::default(),
            pause_a: PauseState::default(),
            pause_b: PauseState::default(),
            verified: Verification::default(),
            store: MessageStore::new(),
            pending: Vec::new(),
        })
    }

    /// First party
    pub fn party_a(&self) -> PartyId {
        self.party_a
    }

    /// Second party
    pub fn party_b(&self) -> PartyId {
        self.party_b
    }

    /// Unix time after which a verified agreement stops being valid
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    /// Approval flag of one party
    pub fn approval(&self, side: Side) -> Approval {
        match side {
            Side::A => self.approved_a,
            Side::B => self.approved_b,
        }
    }

    /// Pause flag of one party
    pub fn pause_state(&self, side: Side) -> PauseState {
        match side {
            Side::A => self.pause_a,
            Side::B => self.pause_b,
        }
    }

    /// Verification flag
    pub fn verification(&self) -> Verification {
        self.verified
    }

    /// Read access to the message store
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Notifications emitted since the last [`Agreement::take_events`]
    pub fn pending_events(&self) -> &[AgreementEvent] {
        &self.pending
    }

    /// Hand pending notifications to the caller
    pub fn take_events(&mut self) -> Vec<AgreementEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Which slot `caller` occupies; anyone else is rejected
    pub fn side_of(&self, caller: &PartyId) -> AgreementResult<Side> {
        if *caller == self.party_a {
            Ok(Side::A)
        } else if *caller == self.party_b {
            Ok(Side::B)
        } else {
            Err(AgreementError::NotAParty(*caller))
        }
    }

    fn party(&self, side: Side) -> PartyId {
        match side {
            Side::A => self.party_a,
            Side::B => self.party_b,
        }
    }

    fn require_unsigned(&self) -> AgreementResult<()> {
        match self.verified {
            Verification::Unverified => Ok(()),
            Verification::Verified => Err(AgreementError::AlreadyVerified),
        }
    }

    fn require_unpaused(&self) -> AgreementResult<()> {
        if self.is_paused() {
            return Err(AgreementError::Paused);
        }
        Ok(())
    }

    fn require_initialized(&self) -> AgreementResult<()> {
        if self.store.is_empty() {
            return Err(AgreementError::NotInitialized);
        }
        Ok(())
    }

    fn emit(&mut self, event: AgreementEvent) {
        info!(%event, "agreement notification");
        self.pending.push(event);
    }

    /// Run `op` all-or-nothing: on error the record is restored as it was.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> AgreementResult<T>,
    ) -> AgreementResult<T> {
        let snapshot = self.clone();
        let result = op(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    /// Store the first batch of messages. Runs once per agreement.
    pub fn initialize(
        &mut self,
        caller: &PartyId,
        messages: &[MessageParams],
    ) -> AgreementResult<Vec<Message>> {
        self.transact(|this| {
            this.side_of(caller)?;
            this.require_unsigned()?;
            if !this.store.is_empty() {
                return Err(AgreementError::AlreadyInitialized);
            }
            if messages.is_empty() {
                return Err(AgreementError::InvalidInput(
                    "initialize needs at least one message".to_string(),
                ));
            }

            let mut stored = Vec::with_capacity(messages.len());
            for params in messages {
                if this.store.is_message(params) {
                    return Err(AgreementError::DuplicateMessage {
                        section: params.section,
                        sub_section: params.sub_section,
                    });
                }
                stored.push(this.store.append(params)?);
            }

            this.emit(AgreementEvent::Initialized {
                count: stored.len(),
            });
            Ok(stored)
        })
    }

    /// Append one message after initialization
    pub fn add_message(
        &mut self,
        caller: &PartyId,
        params: &MessageParams,
    ) -> AgreementResult<Message> {
        self.transact(|this| {
            this.side_of(caller)?;
            this.require_unsigned()?;
            this.require_unpaused()?;
            this.require_initialized()?;
            if this.store.is_message(params) {
                return Err(AgreementError::DuplicateMessage {
                    section: params.section,
                    sub_section: params.sub_section,
                });
            }

            let message = this.store.append(params)?;
            this.emit(AgreementEvent::Modified {
                section: message.section,
                sub_section: message.sub_section,
                index: message.index,
            });
            Ok(message)
        })
    }

    /// Replace the body at an existing slot. Returns the previous record.
    pub fn update_message(
        &mut self,
        caller: &PartyId,
        params: &MessageParams,
    ) -> AgreementResult<Message> {
        self.transact(|this| {
            this.side_of(caller)?;
            this.require_unsigned()?;
            this.require_unpaused()?;

            let old = this.store.replace(params)?;
            let current = this.store.get_message(params.section, params.sub_section)?;
            this.emit(AgreementEvent::Modified {
                section: current.section,
                sub_section: current.sub_section,
                index: current.index,
            });
            Ok(old)
        })
    }

    /// Tombstone a live message. Returns the removed record.
    pub fn remove(&mut self, caller: &PartyId, params: &MessageParams) -> AgreementResult<Message> {
        self.transact(|this| {
            this.side_of(caller)?;
            this.require_unsigned()?;
            this.require_unpaused()?;
            this.store.tombstone(params)
        })
    }

    /// Toggle the caller's own pause flag and return its new state.
    ///
    /// Unpausing only notifies once both flags are clear.
    pub fn manage_review_status(&mut self, caller: &PartyId) -> AgreementResult<PauseState> {
        self.transact(|this| {
            let side = this.side_of(caller)?;
            this.require_unsigned()?;
            this.require_initialized()?;

            let flag = match side {
                Side::A => &mut this.pause_a,
                Side::B => &mut this.pause_b,
            };
            *flag = flag.toggled();
            let state = *flag;

            match state {
                PauseState::Paused => this.emit(AgreementEvent::Paused { by: *caller }),
                PauseState::Unpaused if !this.is_paused() => {
                    this.emit(AgreementEvent::UnPaused { by: *caller })
                }
                PauseState::Unpaused => {}
            }
            Ok(state)
        })
    }

    /// Record the caller's approval. The second approval verifies.
    pub fn approve(&mut self, caller: &PartyId) -> AgreementResult<Verification> {
        self.transact(|this| {
            let side = this.side_of(caller)?;
            this.require_unsigned()?;
            this.require_initialized()?;

            match (this.approval(side), this.approval(side.other())) {
                (Approval::Approved, _) => Err(AgreementError::AlreadyApproved(*caller)),
                (Approval::Unapproved, other) => {
                    match side {
                        Side::A => this.approved_a = Approval::Approved,
                        Side::B => this.approved_b = Approval::Approved,
                    }
                    this.emit(AgreementEvent::Approved { by: *caller });

                    if other == Approval::Approved {
                        this.verified = Verification::Verified;
                        this.emit(AgreementEvent::Verified);
                    }
                    Ok(this.verified)
                }
            }
        })
    }

    /// Verified and not past expiry at `now`
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.verified == Verification::Verified && now <= self.expiry
    }

    /// [`Agreement::is_valid_at`] against a clock
    pub fn is_valid(&self, clock: &dyn Clock) -> bool {
        self.is_valid_at(clock.now())
    }

    /// Whether either party has paused
    pub fn is_paused(&self) -> bool {
        self.pause_a == PauseState::Paused || self.pause_b == PauseState::Paused
    }

    /// Parties that have not approved yet
    pub fn pending_approvals(&self) -> Vec<PartyId> {
        [Side::A, Side::B]
            .into_iter()
            .filter(|side| self.approval(*side) == Approval::Unapproved)
            .map(|side| self.party(side))
            .collect()
    }

    /// Integrity check on the store
    pub fn is_message(&self, params: &MessageParams) -> bool {
        self.store.is_message(params)
    }

    /// Every slot of a section
    pub fn get_section(&self, section: u32) -> &[Message] {
        self.store.get_section(section)
    }

    /// A single slot
    pub fn get_message(&self, section: u32, sub_section: u32) -> AgreementResult<Message> {
        self.store.get_message(section, sub_section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::{ContentHash, Signer};
    use crate::error::ErrorKind;

    const EXPIRY: u64 = 1_000_000;

    struct Fixture {
        alice: PartyId,
        bob: PartyId,
        agreement: Agreement,
    }

    fn msg(section: u32, sub_section: u32, text: &str) -> MessageParams {
        MessageParams::new(section, sub_section, ContentHash::digest(text.as_bytes())).unwrap()
    }

    fn batch() -> Vec<MessageParams> {
        (1..=5)
            .flat_map(|s| (0..2).map(move |k| msg(s, k, &format!("clause {s}.{k}"))))
            .collect()
    }

    fn fixture() -> Fixture {
        let alice = Signer::from_seed(&[1u8; 32]).party_id();
        let bob = Signer::from_seed(&[2u8; 32]).party_id();
        Fixture {
            alice,
            bob,
            agreement: Agreement::new(alice, bob, EXPIRY).unwrap(),
        }
    }

    fn initialized() -> Fixture {
        let mut f = fixture();
        f.agreement.initialize(&f.alice, &batch()).unwrap();
        f.agreement.take_events();
        f
    }

    #[test]
    fn test_new_requires_distinct_parties() {
        let alice = Signer::generate().party_id();
        assert_eq!(
            Agreement::new(alice, alice, EXPIRY),
            Err(AgreementError::IdenticalParties)
        );
    }

    #[test]
    fn test_new_has_default_flags() {
        let f = fixture();
        let a = &f.agreement;
        assert_eq!(a.approval(Side::A), Approval::Unapproved);
        assert_eq!(a.approval(Side::B), Approval::Unapproved);
        assert_eq!(a.pause_state(Side::A), PauseState::Unpaused);
        assert_eq!(a.verification(), Verification::Unverified);
        assert!(a.store().is_empty());
        assert!(!a.is_paused());
        assert_eq!(a.pending_approvals(), vec![f.alice, f.bob]);
    }

    #[test]
    fn test_initialize_stores_batch() {
        let mut f = fixture();
        let stored = f.agreement.initialize(&f.bob, &batch()).unwrap();
        assert_eq!(stored.len(), 10);

        for params in batch() {
            let m = f.agreement.get_message(params.section, params.sub_section).unwrap();
            assert_eq!(m.body, params.body);
            assert_eq!(f.agreement.store().message_index()[m.index], m.body);
        }
        assert_eq!(
            f.agreement.take_events(),
            vec![AgreementEvent::Initialized { count: 10 }]
        );
    }

    #[test]
    fn test_initialize_runs_once() {
        let mut f = initialized();
        assert_eq!(
            f.agreement.initialize(&f.alice, &[msg(9, 0, "late")]),
            Err(AgreementError::AlreadyInitialized)
        );
        assert_eq!(
            f.agreement.initialize(&f.bob, &[msg(9, 0, "late")]),
            Err(AgreementError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_initialize_rolls_back_on_bad_entry() {
        let mut f = fixture();
        let mut messages = batch();
        // Second write to the same slot
        messages.push(msg(1, 0, "clause 1.0"));

        assert!(matches!(
            f.agreement.initialize(&f.alice, &messages),
            Err(AgreementError::DuplicateMessage { section: 1, sub_section: 0 })
        ));
        assert!(f.agreement.store().is_empty());
        assert!(f.agreement.pending_events().is_empty());

        assert!(f.agreement.initialize(&f.alice, &batch()).is_ok());
    }

    #[test]
    fn test_initialize_rejects_empty_batch() {
        let mut f = fixture();
        let err = f.agreement.initialize(&f.alice, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_outsider_is_rejected_everywhere() {
        let mut f = initialized();
        let eve = Signer::generate().party_id();
        let a = &mut f.agreement;

        assert_eq!(a.add_message(&eve, &msg(1, 2, "x")), Err(AgreementError::NotAParty(eve)));
        assert_eq!(a.update_message(&eve, &msg(1, 0, "x")), Err(AgreementError::NotAParty(eve)));
        assert_eq!(
            a.remove(&eve, &msg(1, 0, "clause 1.0")),
            Err(AgreementError::NotAParty(eve))
        );
        assert_eq!(a.manage_review_status(&eve), Err(AgreementError::NotAParty(eve)));
        assert_eq!(a.approve(&eve), Err(AgreementError::NotAParty(eve)));
    }

    #[test]
    fn test_add_before_initialize_fails() {
        let mut f = fixture();
        assert_eq!(
            f.agreement.add_message(&f.alice, &msg(1, 0, "x")),
            Err(AgreementError::NotInitialized)
        );
    }

    #[test]
    fn test_add_message() {
        let mut f = initialized();
        let added = f.agreement.add_message(&f.bob, &msg(3, 2, "rider")).unwrap();
        assert_eq!(added.index, 10);
        assert_eq!(f.agreement.get_section(3).len(), 3);
        assert_eq!(
            f.agreement.take_events(),
            vec![AgreementEvent::Modified {
                section: 3,
                sub_section: 2,
                index: 10
            }]
        );
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut f = initialized();
        assert_eq!(
            f.agreement.add_message(&f.alice, &msg(2, 1, "clause 2.1")),
            Err(AgreementError::DuplicateMessage {
                section: 2,
                sub_section: 1
            })
        );
        assert_eq!(f.agreement.store().message_index().len(), 10);
    }

    #[test]
    fn test_update_preserves_index() {
        let mut f = initialized();
        let before = f.agreement.get_message(4, 1).unwrap();
        let old = f.agreement.update_message(&f.alice, &msg(4, 1, "amended")).unwrap();
        let after = f.agreement.get_message(4, 1).unwrap();

        assert_eq!(old, before);
        assert_eq!(after.index, before.index);
        assert_eq!(after.section, before.section);
        assert_eq!(after.sub_section, before.sub_section);
        assert_eq!(after.body, ContentHash::digest(b"amended"));
        assert!(f.agreement.is_message(&msg(4, 1, "amended")));
        assert!(!f.agreement.is_message(&msg(4, 1, "clause 4.1")));
    }

    #[test]
    fn test_update_out_of_range() {
        let mut f = initialized();
        assert!(matches!(
            f.agreement.update_message(&f.alice, &msg(4, 2, "x")),
            Err(AgreementError::SubSectionOutOfRange { len: 2, .. })
        ));
        assert!(f.agreement.pending_events().is_empty());
    }

    #[test]
    fn test_update_refills_removed_slot() {
        let mut f = initialized();
        f.agreement.remove(&f.bob, &msg(2, 1, "clause 2.1")).unwrap();

        let old = f.agreement.update_message(&f.alice, &msg(2, 1, "restored")).unwrap();
        assert!(old.is_tombstone());

        let index = f.agreement.store().message_index();
        assert_eq!(index.len(), 11);
        assert!(index[3].is_zero());
        assert_eq!(index[10], ContentHash::digest(b"restored"));
        assert_eq!(
            f.agreement.take_events(),
            vec![AgreementEvent::Modified {
                section: 2,
                sub_section: 1,
                index: 10
            }]
        );
        assert_eq!(f.agreement.get_message(2, 1).unwrap().index, 10);
        assert!(f.agreement.is_message(&msg(2, 1, "restored")));
        assert!(f.agreement.store().audit().is_empty());
    }

    #[test]
    fn test_remove_tombstones() {
        let mut f = initialized();
        let removed = f.agreement.remove(&f.bob, &msg(5, 0, "clause 5.0")).unwrap();
        assert_eq!(removed.body, ContentHash::digest(b"clause 5.0"));

        assert_eq!(f.agreement.get_message(5, 0).unwrap(), Message::TOMBSTONE);
        assert!(f.agreement.store().message_index()[removed.index].is_zero());
        assert_eq!(f.agreement.store().message_index().len(), 10);
        assert!(f.agreement.pending_events().is_empty());
    }

    #[test]
    fn test_remove_requires_match() {
        let mut f = initialized();
        assert!(matches!(
            f.agreement.remove(&f.bob, &msg(5, 0, "not the text")),
            Err(AgreementError::MessageNotFound { .. })
        ));
    }

    #[test]
    fn test_pause_blocks_content_changes() {
        let mut f = initialized();
        assert_eq!(f.agreement.manage_review_status(&f.alice), Ok(PauseState::Paused));
        assert!(f.agreement.is_paused());

        assert_eq!(
            f.agreement.add_message(&f.bob, &msg(1, 2, "x")),
            Err(AgreementError::Paused)
        );
        assert_eq!(
            f.agreement.update_message(&f.bob, &msg(1, 0, "x")),
            Err(AgreementError::Paused)
        );
        assert_eq!(
            f.agreement.remove(&f.bob, &msg(1, 0, "clause 1.0")),
            Err(AgreementError::Paused)
        );
    }

    #[test]
    fn test_review_and_approval_allowed_while_paused() {
        let mut f = initialized();
        f.agreement.manage_review_status(&f.alice).unwrap();
        f.agreement.take_events();

        assert_eq!(f.agreement.manage_review_status(&f.bob), Ok(PauseState::Paused));
        assert_eq!(f.agreement.approve(&f.bob), Ok(Verification::Unverified));
        assert_eq!(f.agreement.approve(&f.alice), Ok(Verification::Verified));
        assert!(f.agreement.is_paused());
        assert_eq!(
            f.agreement.take_events(),
            vec![
                AgreementEvent::Paused { by: f.bob },
                AgreementEvent::Approved { by: f.bob },
                AgreementEvent::Approved { by: f.alice },
                AgreementEvent::Verified
            ]
        );

        // Frozen once verified, paused or not
        assert_eq!(
            f.agreement.add_message(&f.alice, &msg(1, 2, "x")),
            Err(AgreementError::AlreadyVerified)
        );
    }

    #[test]
    fn test_unpause_notifies_only_when_both_clear() {
        let mut f = initialized();
        f.agreement.manage_review_status(&f.alice).unwrap();
        f.agreement.manage_review_status(&f.bob).unwrap();
        assert_eq!(
            f.agreement.take_events(),
            vec![
                AgreementEvent::Paused { by: f.alice },
                AgreementEvent::Paused { by: f.bob }
            ]
        );

        // Alice clears hers while Bob still holds
        assert_eq!(f.agreement.manage_review_status(&f.alice), Ok(PauseState::Unpaused));
        assert!(f.agreement.take_events().is_empty());
        assert!(f.agreement.is_paused());
        assert_eq!(f.agreement.pause_state(Side::B), PauseState::Paused);

        assert_eq!(f.agreement.manage_review_status(&f.bob), Ok(PauseState::Unpaused));
        assert_eq!(
            f.agreement.take_events(),
            vec![AgreementEvent::UnPaused { by: f.bob }]
        );
        assert!(!f.agreement.is_paused());
    }

    #[test]
    fn test_pause_requires_initialize() {
        let mut f = fixture();
        assert_eq!(
            f.agreement.manage_review_status(&f.alice),
            Err(AgreementError::NotInitialized)
        );
        assert_eq!(f.agreement.approve(&f.alice), Err(AgreementError::NotInitialized));
    }

    #[test]
    fn test_second_approval_verifies() {
        let mut f = initialized();
        assert_eq!(f.agreement.approve(&f.bob), Ok(Verification::Unverified));
        assert_eq!(f.agreement.verification(), Verification::Unverified);
        assert_eq!(f.agreement.pending_approvals(), vec![f.alice]);

        assert_eq!(f.agreement.approve(&f.alice), Ok(Verification::Verified));
        assert_eq!(
            f.agreement.take_events(),
            vec![
                AgreementEvent::Approved { by: f.bob },
                AgreementEvent::Approved { by: f.alice },
                AgreementEvent::Verified
            ]
        );
    }

    #[test]
    fn test_double_approval_fails() {
        let mut f = initialized();
        f.agreement.approve(&f.alice).unwrap();
        let err = f.agreement.approve(&f.alice).unwrap_err();
        assert_eq!(err, AgreementError::AlreadyApproved(f.alice));
        assert_eq!(err.kind(), ErrorKind::Reentry);
        assert_eq!(f.agreement.verification(), Verification::Unverified);
    }

    #[test]
    fn test_verified_is_frozen() {
        let mut f = initialized();
        f.agreement.approve(&f.alice).unwrap();
        f.agreement.approve(&f.bob).unwrap();

        assert_eq!(
            f.agreement.add_message(&f.alice, &msg(1, 2, "x")),
            Err(AgreementError::AlreadyVerified)
        );
        assert_eq!(
            f.agreement.update_message(&f.alice, &msg(1, 0, "x")),
            Err(AgreementError::AlreadyVerified)
        );
        assert_eq!(
            f.agreement.remove(&f.alice, &msg(1, 0, "clause 1.0")),
            Err(AgreementError::AlreadyVerified)
        );
        assert_eq!(
            f.agreement.manage_review_status(&f.bob),
            Err(AgreementError::AlreadyVerified)
        );
        assert_eq!(f.agreement.approve(&f.bob), Err(AgreementError::AlreadyVerified));
    }

    #[test]
    fn test_validity_window() {
        let mut f = initialized();
        let clock = ManualClock::new(EXPIRY - 10);
        assert!(!f.agreement.is_valid(&clock));

        f.agreement.approve(&f.alice).unwrap();
        f.agreement.approve(&f.bob).unwrap();
        assert!(f.agreement.is_valid(&clock));

        clock.set(EXPIRY);
        assert!(f.agreement.is_valid(&clock));
        clock.advance(1);
        assert!(!f.agreement.is_valid(&clock));
    }

    #[test]
    fn test_pending_events_not_persisted() {
        let mut f = fixture();
        f.agreement.initialize(&f.alice, &batch()).unwrap();
        let json = serde_json::to_string(&f.agreement).unwrap();
        let restored: Agreement = serde_json::from_str(&json).unwrap();

        assert!(restored.pending_events().is_empty());
        assert_eq!(restored.store(), f.agreement.store());
    }
}
