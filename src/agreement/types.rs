//! Message and flag types

use serde::{Deserialize, Serialize};

use crate::crypto::ContentHash;
use crate::error::{AgreementError, AgreementResult};

/// Largest section or sub-section number (24 bits)
pub const MAX_SECTION: u32 = (1 << 24) - 1;

/// Address and body of a message as submitted by a party
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParams {
    /// Section number
    pub section: u32,
    /// Position inside the section
    pub sub_section: u32,
    /// Caller-computed content hash
    pub body: ContentHash,
}

impl MessageParams {
    /// Build params, rejecting addresses wider than 24 bits
    pub fn new(section: u32, sub_section: u32, body: ContentHash) -> AgreementResult<Self> {
        let params = MessageParams {
            section,
            sub_section,
            body,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the 24-bit bound on both address components.
    ///
    /// The zero hash is reserved for tombstones and is never a valid body.
    pub fn validate(&self) -> AgreementResult<()> {
        for value in [self.section, self.sub_section] {
            if value > MAX_SECTION {
                return Err(AgreementError::SectionOutOfRange(value));
            }
        }
        if self.body.is_zero() {
            return Err(AgreementError::InvalidInput(
                "the zero content hash marks removed messages".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the `section:sub_section:hexhash` form used on the command line
    pub fn parse(s: &str) -> AgreementResult<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(section), Some(sub_section), Some(body)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AgreementError::InvalidInput(format!(
                "expected section:sub_section:hash, got {s:?}"
            )));
        };
        let number = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| AgreementError::InvalidInput(format!("bad number {v:?}: {e}")))
        };
        Self::new(number(section)?, number(sub_section)?, ContentHash::from_hex(body)?)
    }
}

/// A stored message: its params plus its permanent position in the message index
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Section number
    pub section: u32,
    /// Position inside the section
    pub sub_section: u32,
    /// Content hash
    pub body: ContentHash,
    /// Position in the flat message index
    pub index: usize,
}

impl Message {
    /// Zero-valued record left behind by a removal
    pub const TOMBSTONE: Message = Message {
        section: 0,
        sub_section: 0,
        body: ContentHash::ZERO,
        index: 0,
    };

    pub(crate) fn new(params: &MessageParams, index: usize) -> Self {
        Message {
            section: params.section,
            sub_section: params.sub_section,
            body: params.body,
            index,
        }
    }

    /// Whether this slot has been removed
    pub fn is_tombstone(&self) -> bool {
        self.body.is_zero()
    }

    /// The params this message was stored from
    pub fn params(&self) -> MessageParams {
        MessageParams {
            section: self.section,
            sub_section: self.sub_section,
            body: self.body,
        }
    }
}

/// Which of the two party slots a caller occupies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// First party
    A,
    /// Second party
    B,
}

impl Side {
    /// The other party's slot
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Per-party approval flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    /// Not yet approved
    #[default]
    Unapproved,
    /// Approved; terminal
    Approved,
}

/// Per-party pause flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    /// Content may change
    #[default]
    Unpaused,
    /// Held for review
    Paused,
}

impl PauseState {
    /// The opposite state
    pub fn toggled(self) -> PauseState {
        match self {
            PauseState::Unpaused => PauseState::Paused,
            PauseState::Paused => PauseState::Unpaused,
        }
    }
}

/// Agreement-wide verification flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// Still open for changes
    #[default]
    Unverified,
    /// Both parties approved; terminal
    Verified,
}
