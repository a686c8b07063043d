//! Section-keyed message store with a flat content-hash index
//!
//! Every live message is recorded twice: once in its section at position
//! `sub_section`, and once as a hash in `message_index` at position
//! `index`. The two views must agree, and [`MessageStore::is_message`] is
//! the check that ties them together. Neither sequence ever shrinks; removal leaves
//! zeroed slots in both.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Message, MessageParams};
use crate::crypto::ContentHash;
use crate::error::{AgreementError, AgreementResult};

/// Dual-structure message storage
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStore {
    sections: BTreeMap<u32, Vec<Message>>,
    message_index: Vec<ContentHash>,
}

impl MessageStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing has ever been stored
    pub fn is_empty(&self) -> bool {
        self.message_index.is_empty()
    }

    /// The flat content-hash index, tombstones included
    pub fn message_index(&self) -> &[ContentHash] {
        &self.message_index
    }

    /// Section numbers that hold at least one slot
    pub fn section_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.sections.keys().copied()
    }

    /// Integrity check: true only if `params` names a live message whose
    /// section slot and index entry agree.
    ///
    /// Never fails; any out-of-range lookup answers `false`.
    pub fn is_message(&self, params: &MessageParams) -> bool {
        if self.message_index.is_empty() {
            return false;
        }
        let Some(stored) = self
            .sections
            .get(&params.section)
            .and_then(|slots| slots.get(params.sub_section as usize))
        else {
            return false;
        };
        if stored.sub_section != params.sub_section || stored.body != params.body {
            return false;
        }
        match self.message_index.get(stored.index) {
            Some(hash) => *hash == params.body,
            None => false,
        }
    }

    /// Next free sub-section of a section
    pub fn next_sub_section(&self, section: u32) -> u32 {
        self.sections.get(&section).map_or(0, |slots| slots.len() as u32)
    }

    /// Append a message to its section and its hash to the index.
    ///
    /// The new message must land at the next free position of its section.
    pub fn append(&mut self, params: &MessageParams) -> AgreementResult<Message> {
        params.validate()?;
        let expected = self.next_sub_section(params.section);
        if params.sub_section != expected {
            return Err(AgreementError::SlotMismatch {
                section: params.section,
                expected,
                actual: params.sub_section,
            });
        }

        let message = Message::new(params, self.message_index.len());
        self.sections.entry(params.section).or_default().push(message);
        self.message_index.push(params.body);

        debug!(
            section = message.section,
            sub_section = message.sub_section,
            index = message.index,
            "message appended"
        );
        Ok(message)
    }

    /// Overwrite the body at an existing slot, keeping its index position.
    ///
    /// Only the section length is checked, so a tombstoned slot may be
    /// refilled. A refilled slot gets a fresh index position because the
    /// tombstone no longer points anywhere. Returns the previous record.
    pub fn replace(&mut self, params: &MessageParams) -> AgreementResult<Message> {
        params.validate()?;
        let len = self.get_section(params.section).len();
        let slot = self
            .sections
            .get_mut(&params.section)
            .and_then(|slots| slots.get_mut(params.sub_section as usize))
            .ok_or(AgreementError::SubSectionOutOfRange {
                section: params.section,
                sub_section: params.sub_section,
                len,
            })?;

        let old = *slot;
        let index = if old.is_tombstone() {
            self.message_index.push(params.body);
            self.message_index.len() - 1
        } else {
            let entry = self.message_index.get_mut(old.index).ok_or(
                AgreementError::MessageNotFound {
                    section: params.section,
                    sub_section: params.sub_section,
                },
            )?;
            *entry = params.body;
            old.index
        };
        *slot = Message::new(params, index);

        debug!(
            section = params.section,
            sub_section = params.sub_section,
            index,
            refilled = old.is_tombstone(),
            "message replaced"
        );
        Ok(old)
    }

    /// Zero both the section slot and the index entry of a live message.
    ///
    /// Returns the removed record.
    pub fn tombstone(&mut self, params: &MessageParams) -> AgreementResult<Message> {
        if !self.is_message(params) {
            return Err(AgreementError::MessageNotFound {
                section: params.section,
                sub_section: params.sub_section,
            });
        }
        let slot = self
            .sections
            .get_mut(&params.section)
            .and_then(|slots| slots.get_mut(params.sub_section as usize))
            .ok_or(AgreementError::MessageNotFound {
                section: params.section,
                sub_section: params.sub_section,
            })?;

        let removed = std::mem::take(slot);
        self.message_index[removed.index] = ContentHash::ZERO;

        debug!(
            section = removed.section,
            sub_section = removed.sub_section,
            index = removed.index,
            "message removed"
        );
        Ok(removed)
    }

    /// Every slot of a section in order, tombstones included
    pub fn get_section(&self, section: u32) -> &[Message] {
        self.sections
            .get(&section)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A single slot
    pub fn get_message(&self, section: u32, sub_section: u32) -> AgreementResult<Message> {
        let slots = self.get_section(section);
        slots
            .get(sub_section as usize)
            .copied()
            .ok_or(AgreementError::SubSectionOutOfRange {
                section,
                sub_section,
                len: slots.len(),
            })
    }

    /// Number of live (non-tombstoned) messages
    pub fn live_count(&self) -> usize {
        self.sections
            .values()
            .flatten()
            .filter(|m| !m.is_tombstone())
            .count()
    }

    /// Addresses of live slots whose two views disagree.
    ///
    /// Empty on a healthy store.
    pub fn audit(&self) -> Vec<(u32, u32)> {
        let mut faults = Vec::new();
        for (&section, slots) in &self.sections {
            for (position, message) in slots.iter().enumerate() {
                if message.is_tombstone() {
                    continue;
                }
                let consistent = message.section == section
                    && message.sub_section as usize == position
                    && self.is_message(&message.params());
                if !consistent {
                    faults.push((section, position as u32));
                }
            }
        }
        faults
    }
}
