//! Ripple-effect propagation.
//!
//! Tagged outcomes leave marks on the social world: violence breaks
//! trust and seeds revenge, theft breeds suspicion. All mutations go
//! through the relationship ledger as upserts keyed by the
//! `(affected, actor)` edge; tags and history are unioned and appended,
//! never overwritten wholesale. This whole path is best-effort: a
//! failed write is logged and never blocks the turn.

use tracing::{info, warn};

use crate::engine::outcome::Outcome;
use crate::entity::{EntityKind, Goal, GoalPriority, GoalStatus};
use crate::ledger::RelationshipUpdate;
use crate::store::WorldStore;

/// Outcome tag marking violent actions.
pub const TAG_VIOLENCE: &str = "VIOLENCE";
/// Outcome tag marking theft.
pub const TAG_THEFT: &str = "THEFT";
/// Goal kind attached to victims of violence.
pub const GOAL_KIND_REVENGE: &str = "REVENGE";

/// Default revenge-goal horizon: 24 hours of world time.
const REVENGE_DURATION_MINUTES: u64 = 60 * 24;

/// Apply the relationship/goal consequences of the turn's selected
/// outcome. Only the primary outcome's tags are considered; unknown tags
/// are ignored.
pub fn apply_ripple_effects(
    store: &mut WorldStore,
    turn: u64,
    outcomes: &[Outcome],
    actor_id: &str,
    target_id: Option<&str>,
    witness_ids: &[String],
) {
    let Some(primary) = outcomes.first() else {
        return;
    };
    if primary.tags.is_empty() {
        return;
    }

    let tags: Vec<String> = primary.tags.iter().map(|t| t.to_uppercase()).collect();
    info!(?tags, turn, "processing ripple tags");

    let actor_name = store
        .get(actor_id)
        .map(|e| e.display_name().to_string())
        .unwrap_or_else(|| actor_id.to_string());

    if tags.iter().any(|t| t == TAG_VIOLENCE) {
        if let Some(target) = target_id.filter(|id| is_reactive_kind(store, id)) {
            store.ledger_mut().upsert(
                actor_id,
                target,
                turn,
                RelationshipUpdate {
                    trust: Some("broken".to_string()),
                    impression: Some("fearful".to_string()),
                    add_tags: vec![
                        "witnessed_violence".to_string(),
                        "victim_of_violence".to_string(),
                    ],
                    add_history: Some(format!(
                        "Turn {turn}: {actor_name} committed violence against me."
                    )),
                },
            );
            create_revenge_goal(store, target, actor_id, turn);
        }

        for witness in witness_ids {
            if witness == actor_id || Some(witness.as_str()) == target_id {
                continue;
            }
            if !is_reactive_kind(store, witness) {
                continue;
            }
            store.ledger_mut().upsert(
                actor_id,
                witness,
                turn,
                RelationshipUpdate {
                    trust: Some("distrustful".to_string()),
                    impression: None,
                    add_tags: vec!["witnessed_violence".to_string()],
                    add_history: Some(format!("Turn {turn}: Witnessed {actor_name} commit violence.")),
                },
            );
        }
    }

    if tags.iter().any(|t| t == TAG_THEFT) {
        if let Some(target) = target_id.filter(|id| is_reactive_kind(store, id)) {
            store.ledger_mut().upsert(
                actor_id,
                target,
                turn,
                RelationshipUpdate {
                    trust: Some("suspicious".to_string()),
                    impression: None,
                    add_tags: vec!["victim_of_theft".to_string()],
                    add_history: Some(format!("Turn {turn}: Suspected {actor_name} of theft.")),
                },
            );
        }
    }
}

fn is_reactive_kind(store: &WorldStore, id: &str) -> bool {
    store
        .get(id)
        .map(|e| matches!(e.kind(), EntityKind::Npc | EntityKind::Creature))
        .unwrap_or(false)
}

/// Attach a revenge goal to the target NPC unless one already exists for
/// this `(kind, target-of-revenge)` pair. Duplicate suppression is
/// mandatory: repeated violence against the same victim yields exactly
/// one revenge goal.
fn create_revenge_goal(store: &mut WorldStore, npc_id: &str, against_id: &str, turn: u64) {
    let Some(mut entity) = store.get(npc_id).cloned() else {
        return;
    };
    let Some(sentient) = entity.as_sentient_mut() else {
        return;
    };

    let already_has = sentient.goals.iter().any(|g| {
        g.kind.as_deref() == Some(GOAL_KIND_REVENGE) && g.target.as_deref() == Some(against_id)
    });
    if already_has {
        return;
    }

    let goal_id = format!("goal_revenge_{turn}_{}", short_suffix());
    sentient.goals.push(Goal {
        id: goal_id.clone(),
        description: format!("Take revenge on {against_id}"),
        kind: Some(GOAL_KIND_REVENGE.to_string()),
        target: Some(against_id.to_string()),
        priority: GoalPriority::High,
        status: GoalStatus::Active,
        created_turn: turn,
        started_at: None,
        duration_est: Some(REVENGE_DURATION_MINUTES),
        completed_at: None,
    });

    if let Err(e) = store.update(npc_id, entity) {
        warn!(npc = npc_id, error = %e, "failed to persist revenge goal");
        return;
    }
    info!(npc = npc_id, goal = %goal_id, "created revenge goal");
}

fn short_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Location, Sentient};

    fn scene() -> (tempfile::TempDir, WorldStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WorldStore::open(dir.path().join("world.json")).unwrap();
        store.create(Entity::Location(Location::new("loc_bar", "The Bar")));
        store.create(Entity::Player(Sentient::skeleton(
            "player",
            "Agent",
            Some("loc_bar".to_string()),
        )));
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_mira",
            "Mira",
            Some("loc_bar".to_string()),
        )));
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_bruno",
            "Bruno",
            Some("loc_bar".to_string()),
        )));
        (dir, store)
    }

    fn violent_outcome() -> Outcome {
        let mut outcome = Outcome::success("a punch lands");
        outcome.tags = vec!["violence".to_string()];
        outcome
    }

    #[test]
    fn test_violence_mutates_target_edge_and_witnesses() {
        let (_dir, mut store) = scene();
        apply_ripple_effects(
            &mut store,
            3,
            &[violent_outcome()],
            "player",
            Some("npc_mira"),
            &["npc_bruno".to_string()],
        );

        let edge = store.ledger().feeling_of("npc_mira", "player").unwrap();
        assert_eq!(edge.trust, "broken");
        assert_eq!(edge.status, "fearful");
        assert!(edge.tags.contains(&"victim_of_violence".to_string()));
        assert_eq!(edge.history.len(), 1);

        let witness_edge = store.ledger().feeling_of("npc_bruno", "player").unwrap();
        assert_eq!(witness_edge.trust, "distrustful");
        assert!(witness_edge.tags.contains(&"witnessed_violence".to_string()));
    }

    #[test]
    fn test_duplicate_revenge_goal_suppressed() {
        let (_dir, mut store) = scene();
        for _ in 0..2 {
            apply_ripple_effects(
                &mut store,
                3,
                &[violent_outcome()],
                "player",
                Some("npc_mira"),
                &[],
            );
        }

        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        let revenge: Vec<_> = mira
            .goals
            .iter()
            .filter(|g| {
                g.kind.as_deref() == Some(GOAL_KIND_REVENGE)
                    && g.status == GoalStatus::Active
            })
            .collect();
        assert_eq!(revenge.len(), 1);
        assert_eq!(revenge[0].target.as_deref(), Some("player"));
        assert_eq!(revenge[0].duration_est, Some(REVENGE_DURATION_MINUTES));
    }

    #[test]
    fn test_theft_marks_suspicion() {
        let (_dir, mut store) = scene();
        let mut outcome = Outcome::success("pockets the coin");
        outcome.tags = vec!["THEFT".to_string()];
        apply_ripple_effects(&mut store, 5, &[outcome], "player", Some("npc_mira"), &[]);

        let edge = store.ledger().feeling_of("npc_mira", "player").unwrap();
        assert_eq!(edge.trust, "suspicious");
        assert!(edge.tags.contains(&"victim_of_theft".to_string()));
        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert!(mira.goals.is_empty(), "theft alone seeds no revenge goal");
    }

    #[test]
    fn test_unknown_tags_ignored() {
        let (_dir, mut store) = scene();
        let mut outcome = Outcome::success("hums a tune");
        outcome.tags = vec!["KINDNESS".to_string()];
        apply_ripple_effects(&mut store, 5, &[outcome], "player", Some("npc_mira"), &[]);
        assert!(store.ledger().edges().is_empty());
    }

    #[test]
    fn test_non_sentient_target_is_ignored() {
        let (_dir, mut store) = scene();
        apply_ripple_effects(
            &mut store,
            5,
            &[violent_outcome()],
            "player",
            Some("loc_bar"),
            &[],
        );
        assert!(store.ledger().edges().is_empty());
    }
}
