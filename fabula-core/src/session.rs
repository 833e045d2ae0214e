//! Session state and the public game-session API.
//!
//! `SessionState` is the explicit value holding everything that used to
//! be ambient engine state: turn counter, world clock, tone. It lives
//! inside the store file so snapshots capture it alongside the
//! entities. `GameSession` is the high-level wrapper an embedding
//! application talks to.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{EngineError, TurnEngine, TurnOutput};
use crate::entity::Entity;
use crate::provider::ContentOracle;
use crate::snapshot::SnapshotManager;
use crate::store::{StoreError, WorldStore};

/// Session-wide mutable state, captured by every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub game_id: String,
    /// Turn counter; 0 means genesis has not happened yet.
    pub turn: u64,
    /// Monotonic world clock in minutes since session start. Never
    /// decremented except via full snapshot restore.
    pub clock_minutes: u64,
    /// Narrative tone handed to the oracle's creative calls.
    pub tone: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            game_id: "current_session".to_string(),
            turn: 0,
            clock_minutes: 0,
            tone: "neutral".to_string(),
        }
    }
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for creating a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the live store file and the saves directory.
    pub data_dir: PathBuf,
    pub game_id: String,
    pub player_id: String,
    pub tone: String,
    /// Seed for the engine's random source; `None` uses entropy.
    pub rng_seed: Option<u64>,
}

impl SessionConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            game_id: "current_session".to_string(),
            player_id: "player".to_string(),
            tone: "neutral".to_string(),
            rng_seed: None,
        }
    }

    pub fn with_game_id(mut self, game_id: impl Into<String>) -> Self {
        self.game_id = game_id.into();
        self
    }

    pub fn with_player_id(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = player_id.into();
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

/// A running interactive-fiction session.
///
/// Single-writer and turn-sequential: the next input is not processed
/// until the previous turn has fully persisted, which `&mut self`
/// enforces structurally.
pub struct GameSession<O: ContentOracle> {
    engine: TurnEngine<O>,
}

impl<O: ContentOracle> GameSession<O> {
    /// Open (or create) the session at `config.data_dir`.
    pub fn open(oracle: O, config: SessionConfig) -> Result<Self, SessionError> {
        let store_path = config.data_dir.join("world.json");
        let saves_dir = config.data_dir.join("saves");

        let mut store = WorldStore::open(store_path)?;
        {
            let session = store.session_mut();
            session.game_id = config.game_id.clone();
            if session.turn == 0 {
                session.tone = config.tone.clone();
            }
        }
        store.flush()?;

        let mut engine = TurnEngine::new(oracle, store, SnapshotManager::new(saves_dir))
            .with_player_id(config.player_id.clone());
        if let Some(seed) = config.rng_seed {
            engine = engine.with_rng_seed(seed);
        }

        info!(game_id = %config.game_id, "session opened");
        Ok(Self { engine })
    }

    /// Process a player action. The genesis turn is detected from the
    /// turn counter; use [`Self::process_turn`] to control the flag
    /// explicitly.
    pub async fn player_action(&mut self, input: &str) -> Result<TurnOutput, SessionError> {
        let is_genesis = self.engine.store().session().turn == 0;
        self.process_turn(input, is_genesis).await
    }

    /// Process a player action with an explicit genesis flag.
    pub async fn process_turn(
        &mut self,
        input: &str,
        is_genesis: bool,
    ) -> Result<TurnOutput, SessionError> {
        Ok(self.engine.process_input(input, is_genesis).await?)
    }

    /// Undo the last turn by restoring its snapshot. Returns `false`
    /// when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        Ok(self.engine.undo()?)
    }

    /// Seed world entities (scenario setup, imports).
    pub fn seed_entities(&mut self, entities: Vec<Entity>) -> Result<(), SessionError> {
        Ok(self.engine.seed_entities(entities)?)
    }

    /// Record the opening narration.
    pub fn inject_genesis_narrative(
        &mut self,
        narrative: &str,
        location_id: &str,
    ) -> Result<(), SessionError> {
        Ok(self.engine.inject_genesis_narrative(narrative, location_id)?)
    }

    /// Clear the world back to genesis.
    pub fn reset_world(&mut self) -> Result<(), SessionError> {
        Ok(self.engine.reset_world()?)
    }

    /// Deepen a lazily-created entity by one generation level.
    pub async fn flesh_out_entity(&mut self, entity_id: &str) -> bool {
        self.engine.flesh_out_entity(entity_id).await
    }

    /// Change the narrative tone for subsequent turns.
    pub fn set_tone(&mut self, tone: impl Into<String>) -> Result<(), SessionError> {
        self.engine.store_mut().session_mut().tone = tone.into();
        self.engine.store_mut().flush()?;
        Ok(())
    }

    pub fn engine(&self) -> &TurnEngine<O> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TurnEngine<O> {
        &mut self.engine
    }

    /// Current turn number.
    pub fn turn(&self) -> u64 {
        self.engine.store().session().turn
    }

    /// Current world clock in minutes.
    pub fn clock_minutes(&self) -> u64 {
        self.engine.store().session().clock_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_defaults() {
        let state = SessionState::default();
        assert_eq!(state.game_id, "current_session");
        assert_eq!(state.turn, 0);
        assert_eq!(state.clock_minutes, 0);
    }

    #[test]
    fn test_config_builders() {
        let config = SessionConfig::new("/tmp/x")
            .with_game_id("noir-01")
            .with_player_id("agent_cipher")
            .with_tone("noir")
            .with_rng_seed(7);
        assert_eq!(config.game_id, "noir-01");
        assert_eq!(config.player_id, "agent_cipher");
        assert_eq!(config.tone, "noir");
        assert_eq!(config.rng_seed, Some(7));
    }
}
