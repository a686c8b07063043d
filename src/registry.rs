//! Registry of agreements keyed by unordered party pair and expiry
//!
//! The lookup key puts the two parties in canonical (byte) order before
//! hashing them with the expiry, so `(a, b, e)` and `(b, a, e)` always
//! resolve to the same agreement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agreement::Agreement;
use crate::crypto::{ContentHash, PartyId};
use crate::error::{AgreementError, AgreementResult};

const REGISTRY_KEY_CONTEXT: &str = "accord 2024 registry key v1";
const AGREEMENT_ID_CONTEXT: &str = "accord 2024 agreement id v1";

/// Identity of a created agreement
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(pub ContentHash);

impl AgreementId {
    /// Parse the hex form
    pub fn from_hex(s: &str) -> AgreementResult<Self> {
        Ok(AgreementId(ContentHash::from_hex(s)?))
    }
}

impl std::fmt::Debug for AgreementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AgreementId({}...)", &self.0.to_hex()[..16])
    }
}

impl std::fmt::Display for AgreementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for AgreementId {
    type Err = AgreementError;

    fn from_str(s: &str) -> AgreementResult<Self> {
        Self::from_hex(s)
    }
}

/// Order-independent lookup key for a party pair and expiry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryKey(pub ContentHash);

impl RegistryKey {
    /// Key for `{a, b}` and `expiry`; swapping `a` and `b` gives the same key
    pub fn new(a: &PartyId, b: &PartyId, expiry: u64) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let mut material = Vec::with_capacity(72);
        material.extend_from_slice(low.as_bytes());
        material.extend_from_slice(high.as_bytes());
        material.extend_from_slice(&expiry.to_le_bytes());

        RegistryKey(ContentHash::derive(REGISTRY_KEY_CONTEXT, &material))
    }
}

/// Notifications emitted by the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A new agreement record was created
    Created {
        /// Id of the new agreement
        id: AgreementId,
        /// First party as given at creation
        party_a: PartyId,
        /// Second party as given at creation
        party_b: PartyId,
        /// Expiry of the agreement
        expiry: u64,
    },
    /// Registry ownership moved
    OwnerChanged {
        /// Old owner
        previous: PartyId,
        /// New owner
        new: PartyId,
    },
}

/// Creates agreements and resolves them by party pair and expiry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    owner: PartyId,
    /// Number of agreements created so far; salts new ids
    created: u64,
    index: BTreeMap<RegistryKey, AgreementId>,
    agreements: BTreeMap<AgreementId, Agreement>,
    #[serde(skip)]
    pending: Vec<RegistryEvent>,
}

impl Registry {
    /// Empty registry administered by `owner`
    pub fn new(owner: PartyId) -> Self {
        Registry {
            owner,
            created: 0,
            index: BTreeMap::new(),
            agreements: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Current administrator
    pub fn owner(&self) -> PartyId {
        self.owner
    }

    /// Number of agreements
    pub fn len(&self) -> usize {
        self.agreements.len()
    }

    /// Whether no agreement has been created
    pub fn is_empty(&self) -> bool {
        self.agreements.is_empty()
    }

    /// Ids of every agreement, in id order
    pub fn ids(&self) -> impl Iterator<Item = &AgreementId> {
        self.agreements.keys()
    }

    /// Create the agreement for `{party_a, party_b}` expiring at `expiry`.
    ///
    /// Open to any caller. One agreement per unordered pair and expiry.
    pub fn create_contract(
        &mut self,
        party_a: PartyId,
        party_b: PartyId,
        expiry: u64,
    ) -> AgreementResult<AgreementId> {
        let agreement = Agreement::new(party_a, party_b, expiry)?;
        let key = RegistryKey::new(&party_a, &party_b, expiry);
        if self.index.contains_key(&key) {
            return Err(AgreementError::AgreementExists);
        }

        let mut material = key.0.as_bytes().to_vec();
        material.extend_from_slice(&self.created.to_le_bytes());
        let id = AgreementId(ContentHash::derive(AGREEMENT_ID_CONTEXT, &material));

        self.index.insert(key, id);
        self.agreements.insert(id, agreement);
        self.created += 1;

        info!(
            %id,
            party_a = %party_a.short(),
            party_b = %party_b.short(),
            expiry,
            "agreement created"
        );
        self.pending.push(RegistryEvent::Created {
            id,
            party_a,
            party_b,
            expiry,
        });
        Ok(id)
    }

    /// Resolve an agreement; argument order of the parties does not matter
    pub fn get_agreement(
        &self,
        party_a: &PartyId,
        party_b: &PartyId,
        expiry: u64,
    ) -> Option<AgreementId> {
        self.index
            .get(&RegistryKey::new(party_a, party_b, expiry))
            .copied()
    }

    /// Read an agreement record
    pub fn agreement(&self, id: &AgreementId) -> AgreementResult<&Agreement> {
        self.agreements.get(id).ok_or(AgreementError::AgreementNotFound)
    }

    /// Mutable access for lifecycle operations
    pub fn agreement_mut(&mut self, id: &AgreementId) -> AgreementResult<&mut Agreement> {
        self.agreements
            .get_mut(id)
            .ok_or(AgreementError::AgreementNotFound)
    }

    /// Hand administration to `new_owner`. Owner only.
    pub fn set_owner(&mut self, caller: &PartyId, new_owner: PartyId) -> AgreementResult<()> {
        if *caller != self.owner {
            return Err(AgreementError::NotOwner(*caller));
        }
        let previous = std::mem::replace(&mut self.owner, new_owner);
        info!(previous = %previous.short(), new = %new_owner.short(), "registry owner changed");
        self.pending.push(RegistryEvent::OwnerChanged {
            previous,
            new: new_owner,
        });
        Ok(())
    }

    /// Hand pending notifications to the caller
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Signer;
    use proptest::prelude::*;

    fn parties() -> (PartyId, PartyId, PartyId) {
        (
            Signer::from_seed(&[1u8; 32]).party_id(),
            Signer::from_seed(&[2u8; 32]).party_id(),
            Signer::from_seed(&[3u8; 32]).party_id(),
        )
    }

    #[test]
    fn test_create_and_lookup_either_order() {
        let (owner, alice, bob) = parties();
        let mut registry = Registry::new(owner);

        let id = registry.create_contract(alice, bob, 5_000).unwrap();
        assert_eq!(registry.get_agreement(&alice, &bob, 5_000), Some(id));
        assert_eq!(registry.get_agreement(&bob, &alice, 5_000), Some(id));
        assert_eq!(registry.get_agreement(&alice, &bob, 5_001), None);

        let agreement = registry.agreement(&id).unwrap();
        assert_eq!(agreement.party_a(), alice);
        assert_eq!(agreement.party_b(), bob);
        assert_eq!(agreement.expiry(), 5_000);
        assert_eq!(
            registry.take_events(),
            vec![RegistryEvent::Created {
                id,
                party_a: alice,
                party_b: bob,
                expiry: 5_000
            }]
        );
    }

    #[test]
    fn test_one_agreement_per_pair_and_expiry() {
        let (owner, alice, bob) = parties();
        let mut registry = Registry::new(owner);
        registry.create_contract(alice, bob, 10).unwrap();

        assert_eq!(
            registry.create_contract(bob, alice, 10),
            Err(AgreementError::AgreementExists)
        );
        let other = registry.create_contract(bob, alice, 11).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_agreement(&alice, &bob, 11), Some(other));
    }

    #[test]
    fn test_identical_parties_rejected() {
        let (owner, alice, _) = parties();
        let mut registry = Registry::new(owner);
        assert_eq!(
            registry.create_contract(alice, alice, 10),
            Err(AgreementError::IdenticalParties)
        );
        assert!(registry.is_empty());
        assert!(registry.take_events().is_empty());
    }

    #[test]
    fn test_ids_are_distinct() {
        let (owner, alice, bob) = parties();
        let mut registry = Registry::new(owner);
        let first = registry.create_contract(alice, bob, 1).unwrap();
        let second = registry.create_contract(alice, owner, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.ids().count(), 2);
    }

    #[test]
    fn test_unknown_id() {
        let (owner, _, _) = parties();
        let registry = Registry::new(owner);
        let missing = AgreementId(ContentHash::digest(b"nope"));
        assert_eq!(registry.agreement(&missing), Err(AgreementError::AgreementNotFound));
    }

    #[test]
    fn test_set_owner_is_gated() {
        let (owner, alice, _) = parties();
        let mut registry = Registry::new(owner);

        assert_eq!(
            registry.set_owner(&alice, alice),
            Err(AgreementError::NotOwner(alice))
        );
        registry.set_owner(&owner, alice).unwrap();
        assert_eq!(registry.owner(), alice);
        assert_eq!(
            registry.take_events(),
            vec![RegistryEvent::OwnerChanged {
                previous: owner,
                new: alice
            }]
        );
        assert_eq!(
            registry.set_owner(&owner, owner),
            Err(AgreementError::NotOwner(owner))
        );
    }

    #[test]
    fn test_registry_serde_roundtrip() {
        let (owner, alice, bob) = parties();
        let mut registry = Registry::new(owner);
        let id = registry.create_contract(alice, bob, 99).unwrap();
        registry.take_events();

        let json = serde_json::to_string(&registry).unwrap();
        let restored: Registry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, registry);
        assert_eq!(restored.get_agreement(&bob, &alice, 99), Some(id));
    }

    proptest! {
        #[test]
        fn prop_key_is_order_independent(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
            expiry in any::<u64>(),
        ) {
            let (a, b) = (PartyId(a), PartyId(b));
            prop_assert_eq!(RegistryKey::new(&a, &b, expiry), RegistryKey::new(&b, &a, expiry));
        }

        #[test]
        fn prop_key_depends_on_expiry(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>(),
            expiry in 0u64..u64::MAX,
        ) {
            let (a, b) = (PartyId(a), PartyId(b));
            prop_assert_ne!(RegistryKey::new(&a, &b, expiry), RegistryKey::new(&a, &b, expiry + 1));
        }
    }
}
