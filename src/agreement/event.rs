//! Notifications emitted by agreement operations

use serde::{Deserialize, Serialize};

use crate::crypto::PartyId;

/// Observable side effect of a successful agreement operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgreementEvent {
    /// The initial batch of messages was stored
    Initialized {
        /// Number of messages in the batch
        count: usize,
    },
    /// A message was added or updated
    Modified {
        /// Section number
        section: u32,
        /// Sub-section number
        sub_section: u32,
        /// Position in the message index
        index: usize,
    },
    /// A party paused the agreement
    Paused {
        /// Party that paused
        by: PartyId,
    },
    /// Both pause flags are clear again
    UnPaused {
        /// Party whose toggle cleared the last flag
        by: PartyId,
    },
    /// A party approved
    Approved {
        /// Approving party
        by: PartyId,
    },
    /// Both parties approved
    Verified,
}

impl std::fmt::Display for AgreementEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized { count } => write!(f, "Initialized ({count} messages)"),
            Self::Modified {
                section,
                sub_section,
                index,
            } => write!(f, "Modified {section}:{sub_section} (index {index})"),
            Self::Paused { by } => write!(f, "Paused by {}...", by.short()),
            Self::UnPaused { by } => write!(f, "UnPaused by {}...", by.short()),
            Self::Approved { by } => write!(f, "Approved by {}...", by.short()),
            Self::Verified => f.write_str("Verified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let json = serde_json::to_value(AgreementEvent::Verified).unwrap();
        assert_eq!(json["event"], "verified");

        let modified = AgreementEvent::Modified {
            section: 2,
            sub_section: 1,
            index: 7,
        };
        let json = serde_json::to_string(&modified).unwrap();
        assert_eq!(serde_json::from_str::<AgreementEvent>(&json).unwrap(), modified);
        assert_eq!(modified.to_string(), "Modified 2:1 (index 7)");
    }
}
