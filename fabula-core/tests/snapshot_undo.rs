//! QA tests for the tape-recorder snapshot/undo scheme.
//!
//! A snapshot of the whole store is written before every non-genesis
//! turn; undo restores turn N-1 by copying that file back over the live
//! store and reopening it.

use std::collections::BTreeMap;

use fabula_core::testing::{ScriptedOracle, TestHarness};
use serde_json::{json, Value};
use tempfile::TempDir;

fn quiet_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .route(
            "action interpreter",
            json!({
                "understanding": "CLEAR",
                "normalized_input": "look around",
                "complexity": "TRIVIAL"
            })
            .to_string(),
        )
        .route("plausibility gate", json!({"plausible": true}).to_string())
        .route(
            "directing the NPCs",
            json!({"npc_actions": [], "goal_updates": []}).to_string(),
        )
        .route(
            "outcome engine",
            json!({
                "analysis": {"reasoning": "calm", "difficulty": "trivial"},
                "possible_outcomes": [
                    {"id": "ok", "outcome_type": "SUCCESS",
                     "narrative_summary": "Nothing stirs.", "probability": 100,
                     "world_changes": {}}
                ]
            })
            .to_string(),
        )
        .route("narrator of an interactive fiction", "The room is quiet.")
        .route(
            "strict state validator",
            json!({"validation_passed": true, "issues": []}).to_string(),
        )
        .route("Extract NEW entities", "[]")
}

fn entity_snapshot(harness: &TestHarness) -> BTreeMap<String, Value> {
    harness
        .store()
        .entities()
        .map(|e| {
            (
                e.id().to_string(),
                serde_json::to_value(e).expect("serialize entity"),
            )
        })
        .collect()
}

// =============================================================================
// TEST 1: Snapshot files appear per turn with stable names
// =============================================================================

#[tokio::test]
async fn test_snapshots_written_per_non_genesis_turn() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), quiet_oracle());
    harness.seed_two_rooms();

    harness.input("look around").await; // genesis: no snapshot
    assert!(harness.engine.snapshots().turns_for("current_session").is_empty());

    harness.input("look around").await; // snapshots turn 1
    harness.input("look around").await; // snapshots turn 2
    assert_eq!(
        harness.engine.snapshots().turns_for("current_session"),
        vec![1, 2]
    );
    assert!(dir.path().join("saves/current_session-1.json").exists());
}

// =============================================================================
// TEST 2: Undo restores the previous turn's world, per-entity identical
// =============================================================================

#[tokio::test]
async fn test_undo_round_trips_world_state() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), quiet_oracle());
    harness.seed_two_rooms();

    harness.input("look around").await;
    let after_turn_one = entity_snapshot(&harness);
    let clock_after_one = harness.engine.store().session().clock_minutes;

    // Turn 2 mutates the world (memory write-back, events, clock).
    harness.input("look around").await;
    assert_eq!(harness.engine.store().session().turn, 2);

    let undone = harness.engine.undo().expect("undo");
    assert!(undone, "undo restores an existing snapshot");

    assert_eq!(harness.engine.store().session().turn, 1);
    assert_eq!(harness.engine.store().session().clock_minutes, clock_after_one);
    assert_eq!(
        entity_snapshot(&harness),
        after_turn_one,
        "restored store must be observationally identical per entity"
    );
}

// =============================================================================
// TEST 3: Missing snapshot is a no-op failure
// =============================================================================

#[tokio::test]
async fn test_missing_snapshot_leaves_store_untouched() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), quiet_oracle());
    harness.seed_two_rooms();

    harness.input("look around").await;
    let before = entity_snapshot(&harness);

    let restored = harness.engine.load_snapshot(42).expect("load_snapshot");
    assert!(!restored, "loading a non-existent snapshot returns false");
    assert_eq!(entity_snapshot(&harness), before, "live store untouched");
    assert_eq!(harness.engine.store().session().turn, 1);
}

// =============================================================================
// TEST 4: Undo at genesis has nothing to restore
// =============================================================================

#[tokio::test]
async fn test_undo_before_any_turn_is_noop() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), quiet_oracle());
    harness.seed_two_rooms();

    assert!(!harness.engine.undo().expect("undo"));
}

// =============================================================================
// TEST 5: Repeated snapshots for the same turn overwrite, not accumulate
// =============================================================================

#[tokio::test]
async fn test_same_turn_snapshot_overwrites() {
    let dir = TempDir::new().expect("tempdir");
    let mut harness = TestHarness::new(dir.path(), quiet_oracle());
    harness.seed_two_rooms();

    harness.input("look around").await;
    harness.input("look around").await;

    // Undo back to turn 1, then replay: the turn-1 snapshot slot is
    // reused rather than duplicated.
    assert!(harness.engine.undo().expect("undo"));
    harness.input("look around").await;

    assert_eq!(
        harness.engine.snapshots().turns_for("current_session"),
        vec![1]
    );
}
