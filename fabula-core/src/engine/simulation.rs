//! Goal-driven time advance.
//!
//! All goal durations are in minutes; the world clock never moves except
//! through here (full snapshot restore aside). NPC goals scheduled
//! against the clock complete as time passes, and the earliest
//! completion inside the requested window interrupts the turn, cutting
//! the elapsed time short.

use serde::Serialize;
use tracing::info;

use crate::entity::{EntityKind, GoalStatus};
use crate::store::WorldStore;

/// Default goal duration when the record carries none.
const DEFAULT_GOAL_DURATION_MINUTES: u64 = 10;

/// A goal that completed during the advance.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedGoal {
    pub npc_name: String,
    pub goal_id: String,
}

/// The earliest completion that cut the advance short.
#[derive(Debug, Clone, Serialize)]
pub struct Interrupt {
    pub reason: String,
    pub minutes_elapsed: u64,
}

/// Result of one time advance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationResult {
    pub completed_goals: Vec<CompletedGoal>,
    pub interrupt: Option<Interrupt>,
}

/// Advance the clock by up to `minutes_requested` from `clock`.
///
/// Every active NPC goal whose finish time
/// (`started_at` defaulting to the current clock, plus `duration_est`
/// defaulting to 10 minutes) lands inside the window is marked
/// completed, removed from the active set, and persisted. The earliest
/// completion that lands strictly before the full window elapses becomes
/// the single surfaced interrupt; later completions still apply their
/// state changes but do not shorten the turn further.
pub fn advance_time(
    store: &mut WorldStore,
    minutes_requested: u64,
    clock: u64,
) -> SimulationResult {
    info!(minutes_requested, clock, "advancing world time");

    let mut result = SimulationResult::default();
    let mut actual_elapsed = minutes_requested;

    let npc_ids = store.ids_of_kind(EntityKind::Npc);
    for npc_id in npc_ids {
        let Some(mut entity) = store.get(&npc_id).cloned() else {
            continue;
        };
        let Some(sentient) = entity.as_sentient_mut() else {
            continue;
        };
        if !sentient.goals.iter().any(|g| g.status == GoalStatus::Active) {
            continue;
        }

        let npc_name = sentient.name.display.clone();
        let mut dirty = false;

        for goal in &mut sentient.goals {
            if goal.status != GoalStatus::Active {
                continue;
            }

            let started = goal.started_at.unwrap_or(clock);
            let duration = goal.duration_est.unwrap_or(DEFAULT_GOAL_DURATION_MINUTES);
            let finish = started + duration;

            if finish <= clock + minutes_requested {
                info!(npc = %npc_name, goal = %goal.id, finish, "goal completed");
                goal.status = GoalStatus::Completed;
                goal.completed_at = Some(finish);
                dirty = true;

                result.completed_goals.push(CompletedGoal {
                    npc_name: npc_name.clone(),
                    goal_id: goal.id.clone(),
                });

                // The earliest completion inside the window interrupts the
                // turn; only one interrupt is surfaced per advance.
                if finish < clock + actual_elapsed {
                    actual_elapsed = finish.saturating_sub(clock);
                    result.interrupt = Some(Interrupt {
                        reason: format!("{npc_name} completed {}", goal.id),
                        minutes_elapsed: actual_elapsed,
                    });
                }
            }
        }

        if dirty {
            if let Err(e) = store.update(&npc_id, entity) {
                tracing::warn!(npc = %npc_id, error = %e, "failed to persist completed goals");
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Goal, GoalPriority, Sentient};

    fn npc_with_goal(id: &str, name: &str, goal_id: &str, started_at: u64, duration: u64) -> Entity {
        let mut sentient = Sentient::skeleton(id, name, Some("loc_a".to_string()));
        sentient.goals.push(Goal {
            id: goal_id.to_string(),
            description: String::new(),
            kind: None,
            target: None,
            priority: GoalPriority::Medium,
            status: GoalStatus::Active,
            created_turn: 0,
            started_at: Some(started_at),
            duration_est: Some(duration),
            completed_at: None,
        });
        Entity::Npc(sentient)
    }

    fn store() -> (tempfile::TempDir, WorldStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorldStore::open(dir.path().join("world.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_interrupt_truncates_advance() {
        let (_dir, mut store) = store();
        store.create(npc_with_goal("npc_mira", "Mira", "goal_cook", 0, 5));

        let result = advance_time(&mut store, 20, 0);

        let interrupt = result.interrupt.expect("interrupt surfaced");
        assert_eq!(interrupt.minutes_elapsed, 5);
        assert!(interrupt.reason.contains("Mira"));
        assert!(interrupt.reason.contains("goal_cook"));

        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert_eq!(mira.goals[0].status, GoalStatus::Completed);
        assert_eq!(mira.goals[0].completed_at, Some(5));
    }

    #[test]
    fn test_only_earliest_completion_interrupts() {
        let (_dir, mut store) = store();
        store.create(npc_with_goal("npc_mira", "Mira", "goal_late", 0, 15));
        store.create(npc_with_goal("npc_bruno", "Bruno", "goal_early", 0, 5));

        let result = advance_time(&mut store, 20, 0);

        assert_eq!(result.completed_goals.len(), 2, "both goals complete");
        let interrupt = result.interrupt.unwrap();
        assert_eq!(interrupt.minutes_elapsed, 5);
        assert!(interrupt.reason.contains("goal_early"));
    }

    #[test]
    fn test_goal_outside_window_unchanged() {
        let (_dir, mut store) = store();
        store.create(npc_with_goal("npc_mira", "Mira", "goal_long", 0, 60));

        let result = advance_time(&mut store, 20, 0);
        assert!(result.completed_goals.is_empty());
        assert!(result.interrupt.is_none());

        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert_eq!(mira.goals[0].status, GoalStatus::Active);
    }

    #[test]
    fn test_defaults_apply_when_goal_fields_missing() {
        let (_dir, mut store) = store();
        let mut entity = npc_with_goal("npc_mira", "Mira", "goal_loose", 0, 0);
        if let Some(s) = entity.as_sentient_mut() {
            s.goals[0].started_at = None;
            s.goals[0].duration_est = None;
        }
        store.create(entity);

        // started_at defaults to the clock (30), duration to 10.
        let result = advance_time(&mut store, 20, 30);
        assert_eq!(result.completed_goals.len(), 1);
        assert_eq!(result.interrupt.unwrap().minutes_elapsed, 10);
    }
}
