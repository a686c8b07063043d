//! Durable processor state
//!
//! The whole [`ProcessorState`] is written as pretty JSON to a temp file
//! beside the target, then renamed over it, so a crash mid-save leaves the
//! previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AgreementResult;
use crate::processor::ProcessorState;

/// JSON snapshot at a fixed path
#[derive(Clone, Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Snapshot stored at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` if nothing has been saved yet.
    ///
    /// Every store is audited, so a tampered message index surfaces as
    /// [`AgreementError::Storage`](crate::error::AgreementError::Storage).
    pub fn load(&self) -> AgreementResult<Option<ProcessorState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        let state: ProcessorState = serde_json::from_slice(&data)?;
        state.check_integrity()?;
        debug!(path = %self.path.display(), "state loaded");
        Ok(Some(state))
    }

    /// Replace the snapshot with `state`
    pub fn save(&self, state: &ProcessorState) -> AgreementResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}
