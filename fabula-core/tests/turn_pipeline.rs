//! QA tests for the turn pipeline.
//!
//! These drive the full orchestrator through scripted oracle responses:
//! fast-path movement with lazy population, the ambiguity short-circuit,
//! uncertain resolution with ripple effects, and the structural
//! validation gate. Responses are routed by prompt substring so
//! probabilistic extra calls (ambient events) cannot desynchronize the
//! script.

use fabula_core::engine::ripple::GOAL_KIND_REVENGE;
use fabula_core::entity::{EntityKind, GoalStatus};
use fabula_core::testing::{assert_has_entity, assert_player_at, ScriptedOracle, TestHarness};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// TEST 1: Fast-path movement with lazy destination population
// =============================================================================

#[tokio::test]
async fn test_fast_path_movement_end_to_end() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new()
        .route(
            "action interpreter",
            json!({
                "understanding": "CLEAR",
                "normalized_input": "go to Archive",
                "complexity": "TRIVIAL"
            })
            .to_string(),
        )
        .route(
            "set designer",
            json!([
                {"name": "Ledger Stand", "description": "A lectern stacked with mouldering ledgers.",
                 "keywords": ["ledger", "stand"], "state": {"searchable": true}}
            ])
            .to_string(),
        )
        .route(
            "narrator of an interactive fiction",
            "You step into the Archive. Dust hangs in the lamplight over a ledger stand.",
        )
        .route("Extract NEW entities", "[]");

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    let output = harness.input("go to Archive").await;

    // The player moved along the connection.
    assert_player_at(&harness, "loc_b");
    assert_eq!(
        output.world_state_delta["player"]["state"]["current_location_id"],
        "loc_b",
        "delta must carry the movement"
    );

    // The empty destination was lazily populated via one oracle call.
    let objects_in_b: Vec<_> = harness
        .store()
        .list_by_location("loc_b")
        .into_iter()
        .filter(|e| e.kind() == EntityKind::Object)
        .map(|e| e.display_name().to_string())
        .collect();
    assert_eq!(objects_in_b, vec!["Ledger Stand"]);

    // Narration came from the narrator call.
    assert!(output.narrative.starts_with("You step into the Archive."));
    assert_eq!(output.consequences.len(), 1);
    assert_eq!(output.consequences[0].outcome_type, "SUCCESS");

    // One move event per observer present at the destination (the
    // player alone; Mira stayed behind).
    let move_events: Vec<_> = harness
        .store()
        .events()
        .iter()
        .filter(|e| e.action_type == "move")
        .collect();
    assert_eq!(move_events.len(), 1);
    assert_eq!(move_events[0].observer_id, "player");
    assert_eq!(move_events[0].location_id, "loc_b");
    assert_eq!(move_events[0].event_data["to"], "loc_b");

    assert!(output.tokens_used > 0, "oracle usage is accounted");
}

// =============================================================================
// TEST 2: Ambiguous interpretation short-circuits to a failure turn
// =============================================================================

#[tokio::test]
async fn test_ambiguous_input_short_circuits() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new().route(
        "action interpreter",
        json!({
            "understanding": "AMBIGUOUS",
            "normalized_input": "open the door",
            "ambiguity_explanation": "There are three doors here. Which one?"
        })
        .to_string(),
    );

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    let output = harness.input("open the door").await;

    assert_eq!(output.narrative, "There are three doors here. Which one?");
    assert_eq!(output.consequences.len(), 1);
    assert_eq!(output.consequences[0].outcome_type, "FAILURE");
    assert_eq!(output.consequences[0].duration_minutes, Some(0));
    assert_eq!(output.world_state_delta, json!({}));

    // The turn was consumed but the world did not move.
    assert_eq!(harness.engine.store().session().turn, 1);
    assert_eq!(harness.engine.store().session().clock_minutes, 0);
    assert_player_at(&harness, "loc_a");
}

// =============================================================================
// TEST 3: Uncertain resolution: spectrum, sanitization, agency,
// ripples, narration, memory write-back
// =============================================================================

#[tokio::test]
async fn test_uncertain_violence_turn() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new()
        .route(
            "action interpreter",
            json!({
                "understanding": "CLEAR",
                "normalized_input": "punch Mira",
                "complexity": "COMPLEX",
                "referenced_entities": [
                    {"mentioned_as": "Mira", "entity_name": "Mira Vane",
                     "entity_id": "npc_mira", "entity_type": "npc", "confidence": 0.97}
                ]
            })
            .to_string(),
        )
        .route("plausibility gate", json!({"plausible": true}).to_string())
        .route(
            "outcome engine",
            json!({
                "analysis": {"reasoning": "Unprovoked assault at close range", "difficulty": "easy"},
                "possible_outcomes": [
                    {"id": "hit", "outcome_type": "SUCCESS",
                     "narrative_summary": "The punch lands hard.",
                     "probability": 100,
                     "world_changes": {"npc": {"npc_mira": {"state": {"health_status": "injured"}}}},
                     "duration_minutes": 2,
                     "tags": ["VIOLENCE"],
                     "npc_triggers": [{"npc_id": "npc_mira", "trigger_reason": "She was just struck"}]}
                ]
            })
            .to_string(),
        )
        .route(
            "directing the NPCs",
            json!({
                "npc_actions": [
                    {"npc_id": "npc_mira", "npc_name": "Mira Vane", "action_type": "REACTIVE",
                     "description": "Stumbles back into the shelving, clutching her jaw",
                     "dialogue": null, "target_id": "player"}
                ],
                "goal_updates": []
            })
            .to_string(),
        )
        .route(
            "narrator of an interactive fiction",
            "Your fist cracks across Mira's jaw and she stumbles back into the shelving, eyes wide.",
        )
        .route(
            "strict state validator",
            json!({"validation_passed": true, "issues": []}).to_string(),
        )
        .route("Extract NEW entities", "[]");

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    let output = harness.input("punch Mira in the face").await;

    // The sanitized delta was committed.
    let mira = harness.store().get("npc_mira").expect("mira exists");
    let mira = mira.as_sentient().expect("sentient");
    assert_eq!(mira.state.health_status, "injured");

    // Ripple: relationship edge mutated with the read convention intact.
    let edge = harness
        .store()
        .ledger()
        .feeling_of("npc_mira", "player")
        .expect("edge exists");
    assert_eq!(edge.trust, "broken");
    assert_eq!(edge.status, "fearful");
    assert!(edge.tags.contains(&"victim_of_violence".to_string()));

    // Ripple: revenge goal attached to the victim.
    let revenge: Vec<_> = mira
        .goals
        .iter()
        .filter(|g| g.kind.as_deref() == Some(GOAL_KIND_REVENGE))
        .collect();
    assert_eq!(revenge.len(), 1);
    assert_eq!(revenge[0].target.as_deref(), Some("player"));
    assert_eq!(revenge[0].status, GoalStatus::Active);

    // Agency behavior was recorded on the outcome and persisted as the
    // NPC's current action.
    assert_eq!(output.consequences[0].npc_actions.len(), 1);
    assert_eq!(
        mira.state.current_action.as_ref().map(|a| a.description.as_str()),
        Some("Stumbles back into the shelving, clutching her jaw")
    );

    // Narration fan-out: one event per observer (player + Mira).
    let narration_events: Vec<_> = harness
        .store()
        .events()
        .iter()
        .filter(|e| e.action_type == "NARRATION" && e.turn_number == 1)
        .collect();
    assert_eq!(narration_events.len(), 2);
    for event in &narration_events {
        assert_eq!(
            event.event_data["narrative"],
            output.narrative,
            "all observers share the same narrative text"
        );
    }

    // Memory write-back reached the participant.
    assert_eq!(mira.memories.len(), 1);
    assert!(mira.memories[0].contains("punch Mira"));

    // Outcome duration advanced the clock.
    assert_eq!(harness.engine.store().session().clock_minutes, 2);
}

// =============================================================================
// TEST 4: Structural validation is a hard gate
// =============================================================================

#[tokio::test]
async fn test_structural_gate_drops_invalid_delta() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new()
        .route(
            "action interpreter",
            json!({
                "understanding": "CLEAR",
                "normalized_input": "search the shelves",
                "complexity": "COMPLEX"
            })
            .to_string(),
        )
        .route("plausibility gate", json!({"plausible": true}).to_string())
        .route(
            "outcome engine",
            json!({
                "analysis": {"reasoning": "x", "difficulty": "easy"},
                "possible_outcomes": [
                    {"id": "find", "outcome_type": "SUCCESS",
                     "narrative_summary": "Something glints behind the ledgers.",
                     "probability": 100,
                     "world_changes": {"npc_ghost_99": {"state": {"health_status": "angry"}}}}
                ]
            })
            .to_string(),
        )
        .route(
            "directing the NPCs",
            json!({"npc_actions": [], "goal_updates": []}).to_string(),
        )
        .route(
            "narrator of an interactive fiction",
            "You run a hand along the cold shelving and something glints behind the ledgers.",
        )
        .route(
            "strict state validator",
            json!({"validation_passed": true, "issues": []}).to_string(),
        )
        .route("Extract NEW entities", "[]");

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    let output = harness.input("search the shelves").await;

    // The hallucinated-id delta was rejected, not committed.
    assert!(!harness.store().exists("npc_ghost_99"));
    assert!(
        output.world_state_delta.get("npc_ghost_99").is_none(),
        "rejected state change must not appear in the delta"
    );

    // The turn still completed with narrative.
    assert!(output.narrative.contains("glints"));
    assert_eq!(output.consequences[0].outcome_type, "SUCCESS");
}

// =============================================================================
// TEST 5: Time advance with explicit duration and goal interrupt
// =============================================================================

#[tokio::test]
async fn test_wait_is_interrupted_by_goal_completion() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new()
        .route(
            "action interpreter",
            json!({
                "understanding": "CLEAR",
                "normalized_input": "wait for 2 hours",
                "complexity": "TRIVIAL"
            })
            .to_string(),
        )
        .route("plausibility gate", json!({"plausible": true}).to_string())
        .route(
            "outcome engine",
            json!({
                "analysis": {"reasoning": "waiting", "difficulty": "trivial"},
                "possible_outcomes": [
                    {"id": "wait", "outcome_type": "SUCCESS",
                     "narrative_summary": "Time passes.", "probability": 100,
                     "world_changes": {}}
                ]
            })
            .to_string(),
        )
        .route(
            "directing the NPCs",
            json!({"npc_actions": [], "goal_updates": []}).to_string(),
        )
        .route("narrator of an interactive fiction", "You wait.");

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    // Give Mira a goal finishing five minutes in.
    let mut mira = harness.store().get("npc_mira").unwrap().clone();
    if let Some(sentient) = mira.as_sentient_mut() {
        sentient.goals.push(fabula_core::entity::Goal {
            id: "goal_brew".to_string(),
            description: "Finish brewing the tea".to_string(),
            kind: None,
            target: None,
            priority: fabula_core::entity::GoalPriority::Medium,
            status: GoalStatus::Active,
            created_turn: 0,
            started_at: Some(0),
            duration_est: Some(5),
            completed_at: None,
        });
    }
    harness.engine.store_mut().update("npc_mira", mira).unwrap();

    let output = harness.input("wait for 2 hours").await;

    // The explicit 2-hour request was truncated by the interrupt.
    assert_eq!(harness.engine.store().session().clock_minutes, 5);
    assert!(output.narrative.contains("[INTERRUPT]"));
    assert!(output.narrative.contains("goal_brew"));
    assert_eq!(output.world_state_delta["time"]["current_time"], 5);

    let mira = harness.store().get("npc_mira").unwrap();
    let goal = &mira.as_sentient().unwrap().goals[0];
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.completed_at, Some(5));
}

// =============================================================================
// TEST 6: Oracle failure degrades to the canned fallback, never an error
// =============================================================================

#[tokio::test]
async fn test_total_oracle_failure_still_narrates() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), ScriptedOracle::failing());
    harness.seed_two_rooms();

    let output = harness.input("provoke the universe").await;

    // Interpretation degraded to gibberish, resolution to the canned
    // fallback, narration to the outcome summary. The player still gets
    // text and the world still exists.
    assert!(!output.narrative.is_empty());
    assert_eq!(output.consequences[0].outcome_type, "FAILURE");
    assert_has_entity(&harness, "player");
    assert_has_entity(&harness, "npc_mira");
}

// =============================================================================
// TEST 7: REMEMBER instant command logs a note event
// =============================================================================

#[tokio::test]
async fn test_remember_command_logs_note() {
    let dir = TempDir::new().expect("tempdir");
    let oracle = ScriptedOracle::new().route(
        "action interpreter",
        json!({
            "understanding": "CLEAR",
            "normalized_input": "REMEMBER: the bartender lied about the key",
            "complexity": "TRIVIAL"
        })
        .to_string(),
    );

    let mut harness = TestHarness::new(dir.path(), oracle);
    harness.seed_two_rooms();

    let output = harness.input("REMEMBER: the bartender lied about the key").await;

    assert!(output.narrative.contains("the bartender lied about the key"));
    let notes: Vec<_> = harness
        .store()
        .events()
        .iter()
        .filter(|e| e.action_type == "note")
        .collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].event_data["text"], "the bartender lied about the key");

    // Instant command: no time passes.
    assert_eq!(harness.engine.store().session().clock_minutes, 0);
}
