//! On-disk snapshots of tracker state, so a restart resumes from the last applied L1
//! block instead of replaying from contract storage.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{error::TrackerResult, state::TrackerState};

/// Bumped whenever the serialized layout of [`TrackerState`] changes.
pub const CHECKPOINT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Last L1 block whose events are reflected in `state`.
    pub cursor: u64,
    pub state: TrackerState,
}

impl Checkpoint {
    pub fn new(cursor: u64, state: TrackerState) -> Self {
        Self { version: CHECKPOINT_VERSION, cursor, state }
    }

    /// Writes the checkpoint next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> TrackerResult<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, self).map_err(io::Error::from)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a checkpoint, returning `None` when it is missing, unreadable or from
    /// another layout version.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read checkpoint {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(checkpoint) if checkpoint.version == CHECKPOINT_VERSION => Some(checkpoint),
            Ok(checkpoint) => {
                tracing::warn!(
                    "Ignoring checkpoint version {}, expected {}",
                    checkpoint.version,
                    CHECKPOINT_VERSION
                );
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::TrackerError,
        events::RollupEvent,
        state::tests::{genesis_state, positioned, proposed, proved, T0},
    };

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");

        let mut state = genesis_state(16);
        state.apply(&positioned(proposed(1), 1, 0), T0).unwrap();
        state.apply(&positioned(proved(1, 1), 1, 1), T0).unwrap();
        state
            .apply(&positioned(RollupEvent::ProvingPaused { paused: true }, 2, 0), T0)
            .unwrap();

        let checkpoint = Checkpoint::new(2, state);
        checkpoint.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(Checkpoint::load(&path), Some(checkpoint));
    }

    #[test]
    fn missing_or_foreign_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        assert_eq!(Checkpoint::load(&path), None);

        let mut checkpoint = Checkpoint::new(7, genesis_state(4));
        checkpoint.version = CHECKPOINT_VERSION + 1;
        checkpoint.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path), None);

        fs::write(&path, b"{not json").unwrap();
        assert_eq!(Checkpoint::load(&path), None);
    }

    #[test]
    fn failed_write_is_a_recoverable_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("tracker.json");

        let err = Checkpoint::new(1, genesis_state(4)).save(&path).unwrap_err();
        assert!(matches!(err, TrackerError::Checkpoint(_)));
        assert!(!err.is_fatal());
    }
}
