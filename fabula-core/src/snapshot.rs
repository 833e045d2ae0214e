//! Tape-recorder persistence: whole-store snapshots keyed by turn.
//!
//! Before each non-genesis turn the full store file is copied to
//! `saves/{game_id}-{turn}.json`, overwriting any prior snapshot for
//! that key. Undo is "copy the turn N-1 file back over the live file".
//! Snapshots are never pruned here.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::store::{StoreError, WorldStore};

/// Errors from snapshot capture or restore.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Manages the snapshot directory for one session.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    saves_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(saves_dir: impl Into<PathBuf>) -> Self {
        Self {
            saves_dir: saves_dir.into(),
        }
    }

    /// Stable snapshot filename for `(game_id, turn)`.
    pub fn path_for(&self, game_id: &str, turn: u64) -> PathBuf {
        self.saves_dir.join(format!("{game_id}-{turn}.json"))
    }

    /// Whether a snapshot exists for `(game_id, turn)`.
    pub fn exists(&self, game_id: &str, turn: u64) -> bool {
        self.path_for(game_id, turn).exists()
    }

    /// Copy the live store file into the snapshot slot for `turn`,
    /// overwriting any existing snapshot for that key. The store is
    /// flushed first so the copy sees a complete file.
    pub fn capture(&self, store: &WorldStore, turn: u64) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.saves_dir)?;
        store.flush()?;

        let game_id = store.session().game_id.clone();
        let dest = self.path_for(&game_id, turn);
        if dest.exists() {
            fs::remove_file(&dest)?;
        }
        fs::copy(store.path(), &dest)?;

        info!(game_id, turn, path = %dest.display(), "snapshot captured");
        Ok(dest)
    }

    /// Copy the snapshot for `(game_id, turn)` over `live_path`.
    ///
    /// The caller must have closed (or at minimum quiesced and flushed)
    /// the live store before calling; copying a file mid-write tears it
    /// on platforms with write locks.
    pub fn restore_over(
        &self,
        game_id: &str,
        turn: u64,
        live_path: &Path,
    ) -> Result<(), SnapshotError> {
        let source = self.path_for(game_id, turn);
        if let Err(e) = fs::copy(&source, live_path) {
            error!(game_id, turn, error = %e, "snapshot restore copy failed");
            return Err(SnapshotError::Io(e));
        }
        info!(game_id, turn, "store restored from snapshot");
        Ok(())
    }

    /// Enumerate the snapshot turns available for a game, ascending.
    pub fn turns_for(&self, game_id: &str) -> Vec<u64> {
        let prefix = format!("{game_id}-");
        let mut turns: Vec<u64> = match fs::read_dir(&self.saves_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    name.strip_prefix(&prefix)?
                        .strip_suffix(".json")?
                        .parse()
                        .ok()
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        turns.sort_unstable();
        turns
    }
}
