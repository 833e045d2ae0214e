//! Testing utilities.
//!
//! `ScriptedOracle` is a deterministic stand-in for the content oracle:
//! responses can be routed by prompt substring (robust against extra
//! calls from probabilistic branches) or queued FIFO. Anything
//! unscripted fails the call, which exercises the engine's fallback
//! paths. `TestHarness` wires an engine over a seeded store for
//! integration scenarios.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{TurnEngine, TurnOutput};
use crate::entity::{Entity, Location, Sentient};
use crate::provider::{ContentOracle, GenerateOptions, Generation, OracleError, Role};
use crate::snapshot::SnapshotManager;
use crate::store::WorldStore;

/// Tokens charged per successful scripted generation.
const TOKENS_PER_CALL: u64 = 10;

/// A deterministic scripted oracle.
#[derive(Default)]
pub struct ScriptedOracle {
    routes: Mutex<Vec<(String, String)>>,
    queue: Mutex<VecDeque<String>>,
    fail_all: bool,
    tokens: AtomicU64,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// FIFO-scripted responses, in call order.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// An oracle whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Route any prompt containing `needle` to `response`. Routes take
    /// precedence over the FIFO queue and can fire repeatedly.
    pub fn route(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.routes
            .lock()
            .expect("routes lock")
            .push((needle.into(), response.into()));
        self
    }

    /// Queue one more FIFO response.
    pub fn push_response(&self, response: impl Into<String>) {
        self.queue
            .lock()
            .expect("queue lock")
            .push_back(response.into());
    }
}

#[async_trait]
impl ContentOracle for ScriptedOracle {
    async fn generate(
        &self,
        prompt: &str,
        _role: Role,
        _options: GenerateOptions,
    ) -> Result<Generation, OracleError> {
        if self.fail_all {
            return Err(OracleError::Network("scripted failure".to_string()));
        }

        let routed = self
            .routes
            .lock()
            .expect("routes lock")
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone());

        let text = match routed {
            Some(text) => text,
            None => match self.queue.lock().expect("queue lock").pop_front() {
                Some(text) => text,
                None => {
                    return Err(OracleError::Network(
                        "no scripted response for prompt".to_string(),
                    ))
                }
            },
        };

        self.tokens.fetch_add(TOKENS_PER_CALL, Ordering::Relaxed);
        Ok(Generation {
            text,
            finish_reason: "stop".to_string(),
        })
    }

    fn total_tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

/// Harness wiring a scripted oracle, a store in `data_dir`, and an
/// engine with a fixed rng seed.
pub struct TestHarness {
    pub engine: TurnEngine<ScriptedOracle>,
}

impl TestHarness {
    /// Build a harness rooted at `data_dir` (usually a tempdir).
    pub fn new(data_dir: &Path, oracle: ScriptedOracle) -> Self {
        let store = WorldStore::open(data_dir.join("world.json")).expect("open test store");
        let snapshots = SnapshotManager::new(data_dir.join("saves"));
        let engine = TurnEngine::new(oracle, store, snapshots).with_rng_seed(1234);
        Self { engine }
    }

    /// Seed the canonical two-room scene: the player and one NPC in
    /// `loc_a` ("Atrium"), an empty connected `loc_b` ("Archive").
    pub fn seed_two_rooms(&mut self) {
        let mut atrium = Location::new("loc_a", "Atrium");
        atrium.description = "A tall glass atrium.".to_string();
        atrium.connected_location_ids = vec!["loc_b".to_string()];

        let mut archive = Location::new("loc_b", "Archive");
        archive.description = "Rows of dusty shelving.".to_string();
        archive.connected_location_ids = vec!["loc_a".to_string()];

        self.engine
            .seed_entities(vec![
                Entity::Location(atrium),
                Entity::Location(archive),
                Entity::Player(Sentient::skeleton(
                    "player",
                    "Agent Cipher",
                    Some("loc_a".to_string()),
                )),
                Entity::Npc(Sentient::skeleton(
                    "npc_mira",
                    "Mira Vane",
                    Some("loc_a".to_string()),
                )),
            ])
            .expect("seed scene");
    }

    /// Process one input, auto-detecting genesis.
    pub async fn input(&mut self, text: &str) -> TurnOutput {
        let is_genesis = self.engine.store().session().turn == 0;
        self.engine
            .process_input(text, is_genesis)
            .await
            .expect("turn processing")
    }

    pub fn store(&self) -> &WorldStore {
        self.engine.store()
    }
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert an entity exists in the store.
#[track_caller]
pub fn assert_has_entity(harness: &TestHarness, id: &str) {
    assert!(
        harness.store().exists(id),
        "Expected entity '{id}' to exist in the store"
    );
}

/// Assert the player is at the given location.
#[track_caller]
pub fn assert_player_at(harness: &TestHarness, location_id: &str) {
    let at = harness
        .store()
        .get(harness.engine.player_id())
        .and_then(|p| p.current_location_id().map(str::to_string));
    assert_eq!(
        at.as_deref(),
        Some(location_id),
        "Expected player at '{location_id}', got {at:?}"
    );
}
