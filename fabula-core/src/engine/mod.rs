//! Turn orchestration.
//!
//! One player input per turn, processed through a fixed state machine:
//!
//! ```text
//! SNAPSHOT -> INTERPRET -> (TRAVEL | MOVEMENT_FASTPATH | INSTANT_COMMAND
//!   | PLAUSIBILITY_GATE) -> (CERTAIN | UNCERTAIN) -> TIME_ADVANCE
//!   -> PERSIST -> MEMORY_WRITE
//! ```
//!
//! Turns are strictly sequential; the engine is the sole mutator of the
//! store, and outbound oracle calls are the only suspension points. The
//! player always gets narrative text back: every oracle failure on the
//! way degrades to a deterministic local fallback.

pub mod agency;
pub mod cognition;
pub mod continuity;
pub mod instantiation;
pub mod interpreter;
pub mod narrator;
pub mod opportunities;
pub mod outcome;
pub mod plausibility;
pub mod resolver;
pub mod ripple;
pub mod sanitize;
pub mod simulation;

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::entity::{Entity, EntityId, EntityKind, Opportunity, Severity};
use crate::events::{EventQuery, EventRecord, ACTION_MOVE, ACTION_NARRATION, ACTION_NOTE};
use crate::provider::ContentOracle;
use crate::snapshot::{SnapshotManager, SnapshotError};
use crate::store::{StoreError, WorldStore};

use self::continuity::{ContinuityContext, OBSERVATION_WINDOW};
use self::interpreter::{Complexity, EntityReference, Interpretation, InterpreterContext, Understanding};
use self::narrator::NarrationContext;
use self::opportunities::OpportunityContext;
use self::outcome::Outcome;

lazy_static! {
    static ref MOVEMENT_RE: Regex =
        Regex::new(r"(?i)^(go|move|travel|walk|run) to ").expect("movement pattern");
    static ref MOVEMENT_PREFIX_RE: Regex =
        Regex::new(r"(?i)^(go|move|travel|walk|run) to (the )?").expect("movement prefix pattern");
    static ref INSTANT_RE: Regex =
        Regex::new(r"(?i)^(check|look|inventory|recall|remember|think)").expect("instant pattern");
    static ref HOURS_RE: Regex =
        Regex::new(r"(?i)(?:sleep|wait) (?:for )?(\d+) (?:hours|hour|h)\b").expect("hours pattern");
    static ref MINUTES_RE: Regex =
        Regex::new(r"(?i)(?:sleep|wait) (?:for )?(\d+) (?:minutes|minute|min|m)\b")
            .expect("minutes pattern");
}

/// Probability that a trivial action escalates to the uncertain path.
const SURPRISE_CHANCE: f64 = 0.05;
/// Probability of an ambient event per non-fast-path turn.
const AMBIENT_CHANCE: f64 = 0.03;
/// Minutes charged for dynamic travel.
const TRAVEL_DURATION_MINUTES: u64 = 15;
/// How many recent narrations feed interpretation and continuity.
const NARRATIVE_CONTEXT_WINDOW: usize = 5;

/// Errors that can escape a turn. Oracle failures never appear here;
/// only the store and snapshot-restore machinery can be fatal.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Snapshot restore failed and the live store could not be reopened: {0}")]
    FatalRestore(String),
}

/// The result of one processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutput {
    pub narrative: String,
    pub consequences: Vec<Outcome>,
    pub world_state_delta: Value,
    pub tokens_used: u64,
}

/// Accumulates the branch-specific pieces of a turn before the common
/// tail (time advance, persist, memory write) runs.
#[derive(Default)]
struct TurnAccumulator {
    narrative: String,
    consequences: Vec<Outcome>,
    delta: Map<String, Value>,
    /// Action type for the per-observer event fan-out.
    event_action: Option<&'static str>,
    /// Extra keys merged into the fan-out event data.
    event_extra: Map<String, Value>,
}

/// Cloned view of the player's current scene.
struct Scene {
    location: Option<Entity>,
    location_id: Option<EntityId>,
    location_name: String,
    location_desc: String,
    visible_exits: Vec<String>,
    npcs: Vec<Entity>,
    objects: Vec<Entity>,
}

/// The turn-resolution engine.
pub struct TurnEngine<O: ContentOracle> {
    oracle: O,
    store: WorldStore,
    snapshots: SnapshotManager,
    player_id: EntityId,
    rng: StdRng,
}

impl<O: ContentOracle> TurnEngine<O> {
    /// Create an engine over an open store.
    pub fn new(oracle: O, store: WorldStore, snapshots: SnapshotManager) -> Self {
        Self {
            oracle,
            store,
            snapshots,
            player_id: "player".to_string(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Override the player entity id.
    pub fn with_player_id(mut self, player_id: impl Into<EntityId>) -> Self {
        self.player_id = player_id.into();
        self
    }

    /// Seed the engine's random source, for deterministic tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut WorldStore {
        &mut self.store
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Insert entities directly, for world setup and imports.
    pub fn seed_entities(&mut self, entities: Vec<Entity>) -> Result<(), EngineError> {
        for entity in entities {
            self.store.create(entity);
        }
        self.store.flush()?;
        Ok(())
    }

    /// Record the opening narration as a genesis event.
    pub fn inject_genesis_narrative(
        &mut self,
        narrative: &str,
        location_id: &str,
    ) -> Result<(), EngineError> {
        if narrative.is_empty() {
            return Ok(());
        }
        info!("injecting genesis narrative");
        self.store.log_event(EventRecord::new(
            0,
            location_id,
            self.player_id.clone(),
            ACTION_NARRATION,
            json!({ "narrative": narrative, "importance": 10 }),
        ));
        self.store.flush()?;
        Ok(())
    }

    /// Clear every entity, edge, and event; the session returns to
    /// genesis.
    pub fn reset_world(&mut self) -> Result<(), EngineError> {
        self.store.reset();
        self.store.flush()?;
        Ok(())
    }

    /// Deepen a lazily-created entity by one generation level (e.g. for
    /// scenario setup before the first turn).
    pub async fn flesh_out_entity(&mut self, entity_id: &str) -> bool {
        instantiation::flesh_out_entity(&self.oracle, &mut self.store, entity_id).await
    }

    // ========================================================================
    // Undo ("tape recorder")
    // ========================================================================

    /// Restore the previous turn's snapshot. Returns `false` when there
    /// is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        let turn = self.store.session().turn;
        if turn == 0 {
            return Ok(false);
        }
        self.load_snapshot(turn - 1)
    }

    /// Restore the snapshot for `turn` over the live store.
    ///
    /// A missing snapshot is a no-op failure: returns `false` and the
    /// live store is left untouched. A restore that destroys the live
    /// file and then cannot reopen it is the one fatal error class.
    pub fn load_snapshot(&mut self, turn: u64) -> Result<bool, EngineError> {
        let game_id = self.store.session().game_id.clone();
        if !self.snapshots.exists(&game_id, turn) {
            error!(game_id, turn, "snapshot not found");
            return Ok(false);
        }

        let live_path = self.store.path().to_path_buf();

        // Quiesce the live handle before the copy; the JSON store holds
        // no OS handle between operations, so a flushed store is safe to
        // copy over.
        self.store.flush()?;

        if let Err(copy_err) = self.snapshots.restore_over(&game_id, turn, &live_path) {
            // Recovery: reopen the previous live store.
            return match WorldStore::open(&live_path) {
                Ok(previous) => {
                    self.store = previous;
                    Ok(false)
                }
                Err(reopen_err) => Err(EngineError::FatalRestore(format!(
                    "{copy_err}; reopening previous store failed: {reopen_err}"
                ))),
            };
        }

        match WorldStore::open(&live_path) {
            Ok(restored) => {
                self.store = restored;
                // Resync the turn counter with the restored state.
                self.store.session_mut().turn = turn;
                self.store.flush()?;
                info!(game_id, turn, "restored snapshot");
                Ok(true)
            }
            Err(open_err) => Err(EngineError::FatalRestore(format!(
                "restored file unreadable: {open_err}"
            ))),
        }
    }

    // ========================================================================
    // The turn pipeline
    // ========================================================================

    /// Process one player input and produce the turn's output.
    pub async fn process_input(
        &mut self,
        input: &str,
        is_genesis: bool,
    ) -> Result<TurnOutput, EngineError> {
        let tokens_before = self.oracle.total_tokens();

        // SNAPSHOT, skipped on the genesis turn only. Failure is logged
        // and the turn continues; only undo is degraded.
        if !is_genesis {
            let previous_turn = self.store.session().turn;
            if let Err(e) = self.snapshots.capture(&self.store, previous_turn) {
                error!(error = %e, "snapshot failed");
            }
        }

        self.store.session_mut().turn += 1;
        let turn = self.store.session().turn;
        let clock = self.store.session().clock_minutes;
        let tone = self.store.session().tone.clone();
        info!(turn, input, "processing player input");

        let Some(player_entity) = self.store.get(&self.player_id).cloned() else {
            warn!(player = %self.player_id, "player entity missing");
            return Ok(TurnOutput {
                narrative: "Error: player not found.".to_string(),
                consequences: Vec::new(),
                world_state_delta: json!({}),
                tokens_used: self.oracle.total_tokens() - tokens_before,
            });
        };

        // Opportunity expiration sweep.
        let mut active_ops = player_entity
            .as_sentient()
            .map(|s| s.state.opportunities.clone())
            .unwrap_or_default();
        opportunities::expire(&mut active_ops, clock, turn);

        let mut scene = self.gather_scene(&player_entity);
        let recent_history = self
            .store
            .events()
            .recent_narrations(NARRATIVE_CONTEXT_WINDOW);

        // INTERPRET.
        let inventory = player_entity
            .as_sentient()
            .map(|s| s.state.inventory.clone())
            .unwrap_or_default();
        let mut interpretation = {
            let npc_refs: Vec<&Entity> = scene.npcs.iter().collect();
            let obj_refs: Vec<&Entity> = scene.objects.iter().collect();
            interpreter::interpret(
                &self.oracle,
                input,
                &InterpreterContext {
                    location_name: &scene.location_name,
                    location_desc: &scene.location_desc,
                    visible_exits: &scene.visible_exits,
                    npcs: &npc_refs,
                    objects: &obj_refs,
                    inventory: &inventory,
                    recent_history: &recent_history,
                },
            )
            .await
        };
        let processed = if interpretation.normalized_input.is_empty() {
            input.to_string()
        } else {
            interpretation.normalized_input.clone()
        };
        info!(intent = %processed, "interpreted intent");

        // An ambiguous reading with an explanation short-circuits into a
        // zero-duration failure turn.
        if interpretation.understanding == Understanding::Ambiguous {
            if let Some(explanation) = interpretation.ambiguity_explanation.clone() {
                let outcome = Outcome::failure(explanation.clone());
                return Ok(TurnOutput {
                    narrative: explanation,
                    consequences: vec![outcome],
                    world_state_delta: json!({}),
                    tokens_used: self.oracle.total_tokens() - tokens_before,
                });
            }
        }

        // Dynamic travel beyond the visible exits.
        if interpretation.travel_intent {
            if let Some(target) = interpretation.target_location.clone() {
                if let Some(output) = self
                    .dynamic_travel(&target, &scene, &tone, tokens_before)
                    .await?
                {
                    return Ok(output);
                }
            }
        }

        // Missing-but-plausible references get skeleton records before
        // the pipeline continues.
        self.instantiate_missing(&mut interpretation, &mut scene, turn).await;

        let is_movement = MOVEMENT_RE.is_match(&processed)
            || processed.to_lowercase().starts_with("go to");
        let is_trivial = interpretation.complexity == Some(Complexity::Trivial);

        let mut acc = if is_movement && is_trivial {
            self.movement_fast_path(&processed, &scene, &active_ops, &tone, clock)
                .await?
        } else if let Some(content) = processed.strip_prefix("REMEMBER:") {
            self.remember_note(content.trim(), turn)
        } else if processed.starts_with("RECALL:") {
            self.recall_memories(&player_entity)
        } else {
            self.resolve_action_paths(
                &processed,
                input,
                &player_entity,
                &scene,
                &interpretation,
                &mut active_ops,
                &recent_history,
                &tone,
                turn,
                clock,
                is_trivial,
            )
            .await?
        };

        // TIME_ADVANCE.
        let mut duration = acc
            .consequences
            .first()
            .and_then(|c| c.duration_minutes)
            .unwrap_or(1);
        if acc.consequences.is_empty() && INSTANT_RE.is_match(input) {
            duration = 0;
        }
        if let Some(captures) = HOURS_RE.captures(input) {
            if let Ok(hours) = captures[1].parse::<u64>() {
                duration = hours * 60;
            }
        }
        if let Some(captures) = MINUTES_RE.captures(input) {
            if let Ok(minutes) = captures[1].parse::<u64>() {
                duration = minutes;
            }
        }

        let sim_result = simulation::advance_time(&mut self.store, duration, clock);
        let mut actual_advance = duration;
        if let Some(interrupt) = &sim_result.interrupt {
            actual_advance = interrupt.minutes_elapsed;
            let hours_elapsed = actual_advance as f64 / 60.0;
            acc.narrative.push_str(&format!(
                "\n[INTERRUPT]: {} (after {:.1} hours)",
                interrupt.reason, hours_elapsed
            ));
        }
        if !sim_result.completed_goals.is_empty() {
            info!(goals = ?sim_result.completed_goals, "NPC goals completed");
        }

        let new_clock = clock + actual_advance;
        self.store.session_mut().clock_minutes = new_clock;
        acc.delta
            .insert("time".to_string(), json!({ "current_time": new_clock }));

        // PERSIST: event fan-out, then the merged delta.
        if !acc.narrative.is_empty() {
            self.fan_out_events(&acc, turn);
        }
        self.apply_world_state_delta(&acc.delta);

        // MEMORY_WRITE: best-effort participant memories.
        self.write_participant_memories(&acc, &interpretation, &processed, turn);

        self.store.flush()?;

        Ok(TurnOutput {
            narrative: acc.narrative,
            consequences: acc.consequences,
            world_state_delta: Value::Object(acc.delta),
            tokens_used: self.oracle.total_tokens() - tokens_before,
        })
    }

    // ========================================================================
    // Pipeline stages
    // ========================================================================

    fn gather_scene(&self, player: &Entity) -> Scene {
        let location_id = player.current_location_id().map(str::to_string);
        let location = location_id
            .as_deref()
            .and_then(|id| self.store.get(id))
            .filter(|e| e.kind() == EntityKind::Location)
            .cloned();

        let (location_name, location_desc, visible_exits) = match &location {
            Some(Entity::Location(loc)) => (
                loc.name.clone(),
                loc.description.clone(),
                loc.connected_location_ids
                    .iter()
                    .map(|id| {
                        self.store
                            .get(id)
                            .map(|e| e.display_name().to_string())
                            .unwrap_or_else(|| id.clone())
                    })
                    .collect(),
            ),
            _ => ("Unknown".to_string(), String::new(), Vec::new()),
        };

        let (npcs, objects) = match &location_id {
            Some(loc_id) => {
                let here = self.store.list_by_location(loc_id);
                (
                    here.iter()
                        .filter(|e| e.kind() == EntityKind::Npc && e.id() != self.player_id)
                        .map(|e| (*e).clone())
                        .collect(),
                    here.iter()
                        .filter(|e| e.kind() == EntityKind::Object)
                        .map(|e| (*e).clone())
                        .collect(),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        Scene {
            location,
            location_id,
            location_name,
            location_desc,
            visible_exits,
            npcs,
            objects,
        }
    }

    async fn instantiate_missing(
        &mut self,
        interpretation: &mut Interpretation,
        scene: &mut Scene,
        turn: u64,
    ) {
        let missing: Vec<_> = interpretation
            .missing_entities
            .iter()
            .filter(|m| m.plausible)
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }
        info!(count = missing.len(), "instantiating missing entities");

        for entry in missing {
            let location_id = scene.location_id.as_deref().unwrap_or("unknown").to_string();
            let Some(entity) = instantiation::generate_skeleton(
                &self.oracle,
                &entry.descriptor,
                &location_id,
                &scene.location_name,
                turn,
            )
            .await
            else {
                continue;
            };

            interpretation.referenced_entities.push(EntityReference {
                mentioned_as: entry.descriptor.clone(),
                entity_name: entity.display_name().to_string(),
                entity_id: entity.id().to_string(),
                entity_type: entity.kind().as_str().to_string(),
                confidence: 1.0,
            });
            self.store.create(entity.clone());
            if entity.kind() == EntityKind::Npc {
                scene.npcs.push(entity);
            } else {
                scene.objects.push(entity);
            }
        }
    }

    /// Dynamic travel to a named location beyond the visible exits.
    /// Returns `None` when no destination could be found or generated,
    /// letting the normal pipeline handle the input.
    async fn dynamic_travel(
        &mut self,
        target_name: &str,
        scene: &Scene,
        tone: &str,
        tokens_before: u64,
    ) -> Result<Option<TurnOutput>, EngineError> {
        info!(destination = target_name, "dynamic travel triggered");

        let existing_id = self
            .store
            .find_by_name(target_name)
            .into_iter()
            .find(|e| e.kind() == EntityKind::Location)
            .map(|e| e.id().to_string());

        let target_id = match existing_id {
            Some(id) => {
                info!(id = %id, "found existing location");
                Some(id)
            }
            None => {
                let generated = instantiation::generate_location(
                    &self.oracle,
                    target_name,
                    &scene.location_name,
                    tone,
                )
                .await;
                match generated {
                    Some((mut location, inhabitants)) => {
                        // Maintain the connection from both ends.
                        if let Some(current_id) = &scene.location_id {
                            location.connected_location_ids.push(current_id.clone());
                            if let Some(mut current) = self.store.get(current_id).cloned() {
                                if let Entity::Location(loc) = &mut current {
                                    loc.connected_location_ids.push(location.entity_id.clone());
                                }
                                let _ = self.store.update(current_id, current);
                            }
                        }
                        let id = location.entity_id.clone();
                        self.store.create(Entity::Location(location));
                        for inhabitant in inhabitants {
                            self.store.create(inhabitant);
                        }
                        info!(id = %id, "location generated and saved");
                        Some(id)
                    }
                    None => None,
                }
            }
        };

        let Some(target_id) = target_id else {
            return Ok(None);
        };

        if let Some(mut player) = self.store.get(&self.player_id).cloned() {
            if let Some(sentient) = player.as_sentient_mut() {
                sentient.state.current_location_id = Some(target_id.clone());
            }
            if let Err(e) = self.store.update(&self.player_id, player) {
                warn!(error = %e, "failed to move player during travel");
            }
        }

        let mut consequence =
            Outcome::success(format!("Traveled to {target_name}"));
        consequence.duration_minutes = Some(TRAVEL_DURATION_MINUTES);

        self.store.flush()?;

        Ok(Some(TurnOutput {
            narrative: format!("You make your way to **{target_name}**."),
            consequences: vec![consequence],
            world_state_delta: json!({}),
            tokens_used: self.oracle.total_tokens() - tokens_before,
        }))
    }

    /// Deterministic movement along a visible exit: no oracle outcome,
    /// but an empty destination is lazily populated before narration.
    async fn movement_fast_path(
        &mut self,
        processed: &str,
        scene: &Scene,
        active_ops: &[Opportunity],
        tone: &str,
        clock: u64,
    ) -> Result<TurnAccumulator, EngineError> {
        let target_name = MOVEMENT_PREFIX_RE.replace(processed, "").trim().to_string();
        info!(destination = %target_name, "attempting fast path movement");

        let mut acc = TurnAccumulator::default();

        // Resolve the destination among the current location's
        // connections, by case-insensitive name or exact id.
        let target_id = scene
            .location
            .as_ref()
            .and_then(|e| e.as_location())
            .and_then(|loc| {
                loc.connected_location_ids.iter().find_map(|conn_id| {
                    let conn = self.store.get(conn_id)?;
                    (conn.kind() == EntityKind::Location
                        && (conn.display_name().eq_ignore_ascii_case(&target_name)
                            || conn_id == &target_name))
                        .then(|| conn_id.clone())
                })
            });

        let Some(target_id) = target_id else {
            acc.narrative = "You can't go there from here.".to_string();
            return Ok(acc);
        };

        if let Some(mut player) = self.store.get(&self.player_id).cloned() {
            if let Some(sentient) = player.as_sentient_mut() {
                sentient.state.current_location_id = Some(target_id.clone());
            }
            self.store.update(&self.player_id, player)?;
        }

        let new_location = self.store.get(&target_id).cloned();
        let (new_loc_name, new_loc_desc) = match new_location.as_ref().and_then(|e| e.as_location())
        {
            Some(loc) => (loc.name.clone(), loc.description.clone()),
            None => ("Unknown Location".to_string(), String::new()),
        };

        // Lazy population of an empty destination.
        let mut generated_names: Vec<String> = Vec::new();
        let occupants: Vec<EntityId> = self
            .store
            .list_by_location(&target_id)
            .iter()
            .filter(|e| e.id() != self.player_id)
            .map(|e| e.id().to_string())
            .collect();
        let mut entities_seen = occupants.clone();

        if occupants.is_empty() {
            if let Some(location) = new_location.as_ref().and_then(|e| e.as_location()) {
                info!("destination is empty; triggering lazy population");
                let generated = instantiation::populate_location(&self.oracle, location).await;
                for entity in generated {
                    entities_seen.push(entity.id().to_string());
                    generated_names.push(entity.display_name().to_string());
                    self.store.create(entity);
                }
            }
        }

        let mut final_desc = new_loc_desc;
        if !generated_names.is_empty() {
            final_desc.push_str(&format!(" You spot: {}.", generated_names.join(", ")));
        }

        let mut move_outcome = Outcome::success(format!("You moved to {new_loc_name}. {final_desc}"));
        move_outcome.immediate_effects = vec![format!("Moved to {new_loc_name}")];
        move_outcome.affected_entities = vec![self.player_id.clone(), target_id.clone()];

        // Narrate against the destination's roster.
        let here = self.store.list_by_location(&target_id);
        let npcs_here: Vec<Entity> = here
            .iter()
            .filter(|e| e.kind() == EntityKind::Npc && e.id() != self.player_id)
            .map(|e| (*e).clone())
            .collect();
        let npc_refs: Vec<&Entity> = npcs_here.iter().collect();
        let destination = self.store.get(&target_id).cloned();

        acc.narrative = narrator::generate_narration(
            &self.oracle,
            &move_outcome,
            processed,
            &NarrationContext {
                location: destination.as_ref(),
                clock_minutes: clock,
                tone,
                opportunities: active_ops,
                npcs: &npc_refs,
                npc_actions: &[],
                ambient_event: None,
            },
        )
        .await;

        // Extraction runs on the final prose so narrated-but-unknown
        // things become records.
        let known_names: Vec<String> = here.iter().map(|e| e.display_name().to_string()).collect();
        let player_name = self
            .store
            .get(&self.player_id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| "Player".to_string());
        let narrative = acc.narrative.clone();
        instantiation::extract_from_narrative(
            &self.oracle,
            &mut self.store,
            &narrative,
            &target_id,
            &known_names,
            &[player_name],
        )
        .await;

        acc.consequences = vec![move_outcome];
        acc.delta.insert(
            "player".to_string(),
            json!({ "state": { "current_location_id": target_id } }),
        );
        acc.event_action = Some(ACTION_MOVE);
        acc.event_extra.insert(
            "from".to_string(),
            scene
                .location_id
                .as_ref()
                .map(|id| Value::String(id.clone()))
                .unwrap_or(Value::Null),
        );
        acc.event_extra
            .insert("to".to_string(), Value::String(target_id));
        acc.event_extra
            .insert("entities_seen".to_string(), json!(entities_seen));

        Ok(acc)
    }

    fn remember_note(&mut self, content: &str, turn: u64) -> TurnAccumulator {
        let mut acc = TurnAccumulator::default();
        acc.narrative = format!("You note: \"{content}\"");

        let location_id = self
            .store
            .get(&self.player_id)
            .and_then(|p| p.current_location_id())
            .unwrap_or("unknown")
            .to_string();
        self.store.log_event(EventRecord::new(
            turn,
            location_id,
            self.player_id.clone(),
            ACTION_NOTE,
            json!({ "text": content, "importance": 8 }),
        ));
        acc
    }

    fn recall_memories(&self, player: &Entity) -> TurnAccumulator {
        let mut acc = TurnAccumulator::default();
        let memories = player
            .as_sentient()
            .map(|s| {
                s.memories
                    .iter()
                    .rev()
                    .take(5)
                    .rev()
                    .map(|m| format!("- {m}"))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        acc.narrative = if memories.is_empty() {
            "Thinking... nothing comes to mind.".to_string()
        } else {
            format!("Thinking...\n[Relevant Memories]:\n{}", memories.join("\n"))
        };
        acc
    }

    /// The plausibility gate and the certain/uncertain fork.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_action_paths(
        &mut self,
        processed: &str,
        raw_input: &str,
        player: &Entity,
        scene: &Scene,
        interpretation: &Interpretation,
        active_ops: &mut Vec<Opportunity>,
        recent_history: &[String],
        tone: &str,
        turn: u64,
        clock: u64,
        is_trivial: bool,
    ) -> Result<TurnAccumulator, EngineError> {
        // Ambient event tick.
        let ambient = if self.rng.gen::<f64>() < AMBIENT_CHANCE {
            let severity_roll: f64 = self.rng.gen();
            let severity = if severity_roll > 0.95 {
                Severity::Major
            } else if severity_roll > 0.70 {
                Severity::Moderate
            } else {
                Severity::Minor
            };
            info!(?severity, "ambient event triggered");
            opportunities::generate_ambient(
                &self.oracle,
                &scene.location_name,
                clock,
                turn,
                severity,
            )
            .await
        } else {
            None
        };
        if let Some(event) = &ambient {
            active_ops.push(event.clone());
        }

        // PLAUSIBILITY_GATE.
        let npc_refs: Vec<&Entity> = scene.npcs.iter().collect();
        let obj_refs: Vec<&Entity> = scene.objects.iter().collect();
        let verdict = plausibility::check_action(
            &self.oracle,
            processed,
            tone,
            Some(player),
            scene.location.as_ref(),
            &npc_refs,
            &obj_refs,
        )
        .await;

        if !verdict.plausible {
            let refusal = verdict.refusal.unwrap_or_else(|| "It simply cannot be done.".to_string());
            info!(input = processed, refusal = %refusal, "action rejected by plausibility gate");

            let refusal_outcome = Outcome::failure(format!(
                "The action \"{processed}\" is impossible: {refusal}"
            ));
            let narrative = narrator::generate_narration(
                &self.oracle,
                &refusal_outcome,
                processed,
                &NarrationContext {
                    location: scene.location.as_ref(),
                    clock_minutes: clock,
                    tone,
                    opportunities: active_ops,
                    npcs: &npc_refs,
                    npc_actions: &[],
                    ambient_event: ambient.as_ref(),
                },
            )
            .await;

            let mut acc = TurnAccumulator::default();
            acc.narrative = narrative;
            acc.consequences = vec![refusal_outcome];
            return Ok(acc);
        }

        // 5% of valid trivial actions escalate anyway.
        let surprise = is_trivial && self.rng.gen::<f64>() < SURPRISE_CHANCE;
        if surprise {
            info!(input = processed, "surprise: certain action escalated to uncertain");
        }

        if is_trivial && !surprise {
            self.certain_path(processed, scene, active_ops, ambient.as_ref(), tone, turn, clock)
                .await
        } else {
            self.uncertain_path(
                processed,
                raw_input,
                player,
                scene,
                interpretation,
                active_ops,
                recent_history,
                ambient.as_ref(),
                tone,
                turn,
                clock,
            )
            .await
        }
    }

    /// CERTAIN path: a locally-synthesized no-incident success. No
    /// oracle call for the outcome itself, but idle NPCs still act.
    async fn certain_path(
        &mut self,
        processed: &str,
        scene: &Scene,
        active_ops: &[Opportunity],
        ambient: Option<&Opportunity>,
        tone: &str,
        turn: u64,
        clock: u64,
    ) -> Result<TurnAccumulator, EngineError> {
        info!(input = processed, "processing as CERTAIN action");

        let mut synthetic = Outcome::success(format!(
            "The player performs the action: \"{processed}\" without incident."
        ));
        synthetic.duration_minutes = Some(if INSTANT_RE.is_match(processed) { 0 } else { 1 });

        let new_ops = opportunities::generate(
            &self.oracle,
            &OpportunityContext {
                location_name: &scene.location_name,
                location_desc: &scene.location_desc,
                recent_narrative: "",
                clock_minutes: clock,
                turn,
            },
            active_ops,
        )
        .await;
        let mut all_ops = active_ops.to_vec();
        all_ops.extend(new_ops);

        let npc_refs: Vec<&Entity> = scene.npcs.iter().collect();
        let npc_actions = agency::resolve_agency_turn(
            &self.oracle,
            &mut self.store,
            &scene.location_name,
            &format!("Player Action: {processed}"),
            processed,
            "SUCCESS",
            &npc_refs,
            &[],
            &self.player_id,
            turn,
        )
        .await;
        synthetic.npc_actions = npc_actions.clone();

        let narrative = narrator::generate_narration(
            &self.oracle,
            &synthetic,
            processed,
            &NarrationContext {
                location: scene.location.as_ref(),
                clock_minutes: clock,
                tone,
                opportunities: &all_ops,
                npcs: &npc_refs,
                npc_actions: &npc_actions,
                ambient_event: ambient,
            },
        )
        .await;

        let mut acc = TurnAccumulator::default();
        acc.narrative = narrative;
        acc.delta.insert(
            "player".to_string(),
            json!({ "state": { "opportunities": all_ops } }),
        );
        record_npc_action_deltas(&mut acc.delta, &npc_actions);
        acc.consequences = vec![synthetic];
        Ok(acc)
    }

    /// UNCERTAIN path: full cognitive resolution, sanitization, agency,
    /// ripples, narration, and continuity validation.
    #[allow(clippy::too_many_arguments)]
    async fn uncertain_path(
        &mut self,
        processed: &str,
        raw_input: &str,
        player: &Entity,
        scene: &Scene,
        interpretation: &Interpretation,
        active_ops: &[Opportunity],
        recent_history: &[String],
        ambient: Option<&Opportunity>,
        tone: &str,
        turn: u64,
        clock: u64,
    ) -> Result<TurnAccumulator, EngineError> {
        info!(input = processed, "processing as UNCERTAIN action");

        let context_entities: Vec<&Entity> = scene
            .npcs
            .iter()
            .chain(scene.objects.iter())
            .collect();

        let resolution = cognition::resolve_action(
            &self.oracle,
            &mut self.rng,
            processed,
            Some(player),
            scene.location.as_ref(),
            &context_entities,
            self.store.ledger(),
        )
        .await;
        if let Some(reasoning) = &resolution.reasoning {
            debug!(%reasoning, "cognitive reasoning");
        }
        let mut selected = resolution.outcome;

        // Sanitize, then hard-gate the state changes.
        {
            let mut sanitize_context: Vec<&Entity> = vec![player];
            if let Some(location) = scene.location.as_ref() {
                sanitize_context.push(location);
            }
            sanitize_context.extend(context_entities.iter().copied());
            sanitize::reconcile_ids(
                &mut selected.world_state_changes,
                &sanitize_context,
                &self.store,
            );
        }
        if let Err(reason) = sanitize::validate_structure(&selected.world_state_changes, &self.store)
        {
            warn!(reason = %reason, "structural validation failed; dropping state changes");
            selected.world_state_changes = Value::Null;
        }

        // NPC agency, honoring must-respond triggers.
        let triggers = selected.npc_triggers.clone();
        let mut agency_context = selected.summary.clone();
        for trigger in &triggers {
            agency_context.push_str(&format!(
                " [DIRECTOR NOTE: {} MUST ACT because: {}]",
                trigger.npc_id, trigger.trigger_reason
            ));
        }
        let npc_refs: Vec<&Entity> = scene.npcs.iter().collect();
        let npc_actions = agency::resolve_agency_turn(
            &self.oracle,
            &mut self.store,
            &scene.location_name,
            &agency_context,
            processed,
            &selected.outcome_type,
            &npc_refs,
            &triggers,
            &self.player_id,
            turn,
        )
        .await;
        selected.npc_actions = npc_actions.clone();

        let new_ops = opportunities::generate(
            &self.oracle,
            &OpportunityContext {
                location_name: &scene.location_name,
                location_desc: &scene.location_desc,
                recent_narrative: &selected.summary,
                clock_minutes: clock,
                turn,
            },
            active_ops,
        )
        .await;
        let mut all_ops = active_ops.to_vec();
        all_ops.extend(new_ops);

        let mut acc = TurnAccumulator::default();
        if let Some(changes) = selected.world_state_changes.as_object() {
            acc.delta = changes.clone();
        }

        // Ripple effects: target is the first referenced NPC, witnesses
        // are the other NPCs present.
        let target_id = interpretation
            .referenced_entities
            .iter()
            .find(|r| r.entity_type == "npc")
            .map(|r| r.entity_id.clone());
        let witnesses: Vec<String> = scene
            .npcs
            .iter()
            .map(|n| n.id().to_string())
            .filter(|id| Some(id) != target_id.as_ref())
            .collect();
        ripple::apply_ripple_effects(
            &mut self.store,
            turn,
            std::slice::from_ref(&selected),
            &self.player_id,
            target_id.as_deref(),
            &witnesses,
        );

        let mut narrative = narrator::generate_narration(
            &self.oracle,
            &selected,
            raw_input,
            &NarrationContext {
                location: scene.location.as_ref(),
                clock_minutes: clock,
                tone,
                opportunities: &all_ops,
                npcs: &npc_refs,
                npc_actions: &npc_actions,
                ambient_event: ambient,
            },
        )
        .await;

        // Continuity validation, with correction applied when offered.
        let present: Vec<&Entity> = context_entities.clone();
        let continuity_verdict = continuity::validate_narrative(
            &self.oracle,
            &narrative,
            &present,
            ContinuityContext {
                location_desc: &scene.location_desc,
                previous_narrations: recent_history,
                npc_actions: &npc_actions,
            },
        )
        .await;
        if !continuity_verdict.valid {
            warn!(reason = ?continuity_verdict.reason, "narrative validation issues");
            if let Some(corrected) = continuity_verdict.corrected_narrative {
                info!("applying narrative correction");
                narrative = corrected;
            }
        }

        // Retroactive causality over the recent observation window
        // (always-pass baseline).
        let observations = self
            .store
            .events()
            .recent_observations(&self.player_id, OBSERVATION_WINDOW);
        if let Err(reason) = continuity::check_retroactive_causality(&selected, &observations) {
            warn!(reason = %reason, "retroactive causality violation");
        }

        // Extraction runs on the corrected text only, so hallucinations
        // the validator removed never become records.
        if let Some(location_id) = scene.location_id.clone() {
            let known_names: Vec<String> = context_entities
                .iter()
                .map(|e| e.display_name().to_string())
                .collect();
            let player_name = player.display_name().to_string();
            instantiation::extract_from_narrative(
                &self.oracle,
                &mut self.store,
                &narrative,
                &location_id,
                &known_names,
                &[player_name],
            )
            .await;
        }

        record_npc_action_deltas(&mut acc.delta, &npc_actions);
        let player_entry = acc
            .delta
            .entry("player".to_string())
            .or_insert_with(|| json!({}));
        if let Some(player_obj) = player_entry.as_object_mut() {
            let state = player_obj
                .entry("state".to_string())
                .or_insert_with(|| json!({}));
            if let Some(state_obj) = state.as_object_mut() {
                state_obj.insert("opportunities".to_string(), json!(all_ops));
            }
        }

        acc.narrative = narrative;
        acc.consequences = vec![selected];
        Ok(acc)
    }

    // ========================================================================
    // Turn tail
    // ========================================================================

    /// One event per distinct observer present, all carrying the same
    /// narrative text.
    fn fan_out_events(&mut self, acc: &TurnAccumulator, turn: u64) {
        let location_id = self
            .store
            .get(&self.player_id)
            .and_then(|p| p.current_location_id())
            .unwrap_or("unknown")
            .to_string();

        let mut observers: Vec<EntityId> = vec![self.player_id.clone()];
        for entity in self.store.list_by_location(&location_id) {
            if entity.kind() == EntityKind::Npc && entity.id() != self.player_id {
                observers.push(entity.id().to_string());
            }
        }
        observers.dedup();

        let action_type = acc.event_action.unwrap_or(ACTION_NARRATION);
        for observer in observers {
            let mut data = acc.event_extra.clone();
            data.insert("narrative".to_string(), Value::String(acc.narrative.clone()));
            self.store.log_event(EventRecord::new(
                turn,
                location_id.clone(),
                observer,
                action_type,
                Value::Object(data),
            ));
        }
    }

    /// Merge the accumulated delta into the store: player and per-entity
    /// state shallow-merged, category containers descended, time handled
    /// by the clock.
    fn apply_world_state_delta(&mut self, delta: &Map<String, Value>) {
        for (key, value) in delta {
            match key.as_str() {
                "time" | "opportunities" => continue,
                "player" => {
                    if let Some(patch) = value.as_object() {
                        let player_id = self.player_id.clone();
                        if let Err(e) = self.store.merge_partial(&player_id, patch) {
                            warn!(error = %e, "failed to apply player delta");
                        }
                    }
                }
                "npc" | "location" | "item" | "object" => {
                    let Some(container) = value.as_object() else {
                        continue;
                    };
                    for (entity_id, changes) in container {
                        let Some(patch) = changes.as_object() else {
                            continue;
                        };
                        match self.store.merge_partial(entity_id, patch) {
                            Ok(()) => debug!(entity = %entity_id, "applied delta"),
                            Err(e) => warn!(entity = %entity_id, error = %e, "failed to apply delta"),
                        }
                    }
                }
                entity_id => {
                    let Some(patch) = value.as_object() else {
                        continue;
                    };
                    match self.store.merge_partial(entity_id, patch) {
                        Ok(()) => debug!(entity = %entity_id, "applied delta"),
                        Err(e) => warn!(entity = %entity_id, error = %e, "failed to apply delta"),
                    }
                }
            }
        }
    }

    /// Append a short memory line to every participant NPC. Best-effort:
    /// failures are logged and never fail the turn.
    fn write_participant_memories(
        &mut self,
        acc: &TurnAccumulator,
        interpretation: &Interpretation,
        processed: &str,
        turn: u64,
    ) {
        let summary = acc
            .consequences
            .first()
            .map(|c| c.summary.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                let mut s: String = acc.narrative.chars().take(150).collect();
                if acc.narrative.chars().count() > 150 {
                    s.push_str("...");
                }
                s
            });
        let memory_text = format!("[Turn {turn}] {processed} -> {summary}");

        let mut participants: Vec<EntityId> = interpretation
            .referenced_entities
            .iter()
            .filter(|r| r.entity_type == "npc")
            .map(|r| r.entity_id.clone())
            .collect();
        let location_id = self
            .store
            .get(&self.player_id)
            .and_then(|p| p.current_location_id())
            .map(str::to_string);
        if let Some(loc_id) = location_id {
            for entity in self.store.list_by_location(&loc_id) {
                if entity.kind() == EntityKind::Npc {
                    participants.push(entity.id().to_string());
                }
            }
        }
        participants.sort();
        participants.dedup();

        for npc_id in participants {
            if npc_id == self.player_id {
                continue;
            }
            let Some(mut entity) = self.store.get(&npc_id).cloned() else {
                continue;
            };
            let Some(sentient) = entity.as_sentient_mut() else {
                continue;
            };
            sentient.memories.push(memory_text.clone());
            match self.store.update(&npc_id, entity) {
                Ok(()) => debug!(npc = %npc_id, "persisted memory"),
                Err(e) => error!(npc = %npc_id, error = %e, "failed to persist memory"),
            }
        }
    }
}

/// Record each NPC's chosen action into the delta so it persists as
/// their `current_action`.
fn record_npc_action_deltas(delta: &mut Map<String, Value>, npc_actions: &[agency::NpcAction]) {
    for action in npc_actions {
        if action.npc_id.is_empty() {
            continue;
        }
        let entry = delta
            .entry(action.npc_id.clone())
            .or_insert_with(|| json!({}));
        let Some(entity_obj) = entry.as_object_mut() else {
            continue;
        };
        let state = entity_obj
            .entry("state".to_string())
            .or_insert_with(|| json!({}));
        let Some(state_obj) = state.as_object_mut() else {
            continue;
        };
        state_obj.insert(
            "current_action".to_string(),
            json!({
                "action_type": action.action_type.to_string(),
                "description": action.description,
                "target_id": action.target_id,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_patterns() {
        assert!(MOVEMENT_RE.is_match("go to the archive"));
        assert!(MOVEMENT_RE.is_match("Walk to Main Hall"));
        assert!(!MOVEMENT_RE.is_match("gossip with the barkeep"));
        assert_eq!(
            MOVEMENT_PREFIX_RE.replace("go to the Archive", "").trim(),
            "Archive"
        );
    }

    #[test]
    fn test_duration_patterns() {
        let captures = HOURS_RE.captures("sleep for 2 hours").unwrap();
        assert_eq!(&captures[1], "2");
        let captures = MINUTES_RE.captures("wait 45 minutes").unwrap();
        assert_eq!(&captures[1], "45");
        assert!(HOURS_RE.captures("wait by the door").is_none());
    }

    #[test]
    fn test_instant_verbs() {
        assert!(INSTANT_RE.is_match("look around"));
        assert!(INSTANT_RE.is_match("check inventory"));
        assert!(!INSTANT_RE.is_match("attack the guard"));
    }

    #[test]
    fn test_npc_action_deltas() {
        let mut delta = Map::new();
        record_npc_action_deltas(
            &mut delta,
            &[agency::NpcAction {
                npc_id: "npc_mira".to_string(),
                npc_name: "Mira".to_string(),
                action_type: agency::ActionType::Reactive,
                description: "Backs away".to_string(),
                dialogue: None,
                target_id: None,
                goal_progress: None,
            }],
        );
        assert_eq!(
            delta["npc_mira"]["state"]["current_action"]["description"],
            "Backs away"
        );
    }
}
