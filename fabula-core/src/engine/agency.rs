//! Batch NPC agency resolution.
//!
//! All NPC behavior for a turn, reactions to the player's action and
//! proactive goal pursuit alike, is resolved in one oracle call over the
//! full roster. Outcomes can attach must-respond triggers to NPCs;
//! an NPC that ignores its trigger by returning IDLE is corrected to a
//! reactive action.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::engine::outcome::NpcTrigger;
use crate::entity::{Entity, Goal, GoalPriority, GoalStatus};
use crate::ledger::Ledger;
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};
use crate::store::WorldStore;

/// One NPC's behavior for the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcAction {
    pub npc_id: String,
    #[serde(default)]
    pub npc_name: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    /// The NPC's stated justification for the action.
    #[serde(default)]
    pub goal_progress: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Reactive,
    Proactive,
    Idle,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Reactive => write!(f, "REACTIVE"),
            ActionType::Proactive => write!(f, "PROACTIVE"),
            ActionType::Idle => write!(f, "IDLE"),
        }
    }
}

/// A goal status transition reported by the agency call.
#[derive(Debug, Clone, Deserialize)]
pub struct GoalUpdate {
    pub npc_id: String,
    pub goal_id: String,
    pub new_status: GoalStatus,
    #[serde(default)]
    pub new_goal_description: Option<String>,
}

#[derive(Deserialize)]
struct AgencyResponse {
    #[serde(default)]
    npc_actions: Option<Vec<NpcAction>>,
    #[serde(default)]
    goal_updates: Vec<GoalUpdate>,
}

/// Resolve the turn for every capable NPC in the scene.
///
/// Returns only meaningful (non-IDLE) actions. Goal updates carried by
/// the response are applied best-effort before returning.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_agency_turn<O: ContentOracle>(
    oracle: &O,
    store: &mut WorldStore,
    location_name: &str,
    context_summary: &str,
    player_input: &str,
    outcome_type: &str,
    candidates: &[&Entity],
    triggers: &[NpcTrigger],
    player_id: &str,
    turn: u64,
) -> Vec<NpcAction> {
    let active: Vec<&Entity> = candidates
        .iter()
        .copied()
        .filter(|e| {
            e.as_sentient()
                .map(|s| {
                    let health = s.state.health_status.to_lowercase();
                    health != "unconscious" && health != "dead" && health != "incapacitated"
                })
                .unwrap_or(false)
        })
        .collect();
    if active.is_empty() {
        return Vec::new();
    }

    let roster = active
        .iter()
        .map(|e| roster_line(e, triggers, store.ledger(), player_id))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "You are directing the NPCs of an interactive fiction scene for one turn.\n\n\
         LOCATION: {location}\n\
         WHAT JUST HAPPENED: {context}\n\
         PLAYER INPUT: \"{input}\"\n\
         ACTION OUTCOME: {outcome}\n\n\
         ROSTER:\n{roster}\n\n\
         For EVERY roster NPC decide one action. An NPC with a [DIRECTOR NOTE]\n\
         MUST respond to it; IDLE is not acceptable for them.\n\n\
         Respond with JSON:\n\
         {{\"npc_actions\": [{{\"npc_id\": string, \"npc_name\": string,\n\
           \"action_type\": \"REACTIVE\" | \"PROACTIVE\" | \"IDLE\",\n\
           \"description\": string, \"dialogue\": string | null,\n\
           \"target_id\": string | null, \"goal_progress\": string}}],\n\
          \"goal_updates\": [{{\"npc_id\": string, \"goal_id\": string,\n\
           \"new_status\": \"active\" | \"completed\" | \"failed\" | \"abandoned\",\n\
           \"new_goal_description\": string | null}}]}}",
        location = location_name,
        context = context_summary,
        input = player_input,
        outcome = outcome_type,
        roster = roster,
    );

    info!(count = active.len(), location = location_name, "resolving agency turn");

    let generated = match oracle
        .generate(
            &prompt,
            Role::Logic,
            GenerateOptions::strict_json().with_temperature(0.7),
        )
        .await
    {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "agency resolution failed");
            return Vec::new();
        }
    };

    let response: AgencyResponse = match parse_json(&generated.text) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "agency response unparseable");
            return Vec::new();
        }
    };

    let Some(mut actions) = response.npc_actions else {
        warn!("agency response missing npc_actions");
        return Vec::new();
    };

    // Trigger enforcement: a triggered NPC that answered IDLE is
    // corrected to a reactive response.
    for action in &mut actions {
        if action.action_type != ActionType::Idle {
            continue;
        }
        if let Some(trigger) = triggers.iter().find(|t| t.npc_id == action.npc_id) {
            warn!(npc = %action.npc_id, reason = %trigger.trigger_reason, "director note violated via IDLE");
            action.action_type = ActionType::Reactive;
            if action.description.is_empty() || action.description == "Stays idle" {
                action.description = "Reacts to the situation".to_string();
            }
            action.goal_progress = Some(format!("Director override: {}", trigger.trigger_reason));
        }
    }

    if !response.goal_updates.is_empty() {
        apply_goal_updates(store, &response.goal_updates, turn);
    }

    let meaningful: Vec<NpcAction> = actions
        .into_iter()
        .filter(|a| a.action_type != ActionType::Idle)
        .collect();

    info!(count = meaningful.len(), "agency resolution complete");
    meaningful
}

fn roster_line(entity: &Entity, triggers: &[NpcTrigger], ledger: &Ledger, player_id: &str) -> String {
    let name = entity.display_name();
    let sentient = entity.as_sentient();

    let (status, doing) = sentient
        .map(|s| {
            (
                s.state.health_status.clone(),
                s.state
                    .current_action
                    .as_ref()
                    .map(|a| a.description.clone())
                    .unwrap_or_else(|| "Idle".to_string()),
            )
        })
        .unwrap_or_else(|| ("Active".to_string(), "Idle".to_string()));

    let goals = sentient
        .map(|s| {
            s.active_goals()
                .map(|g| format!("\"{}\"", g.description))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| "None".to_string());

    let memories = sentient
        .map(|s| s.memories.join("\n"))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "None".to_string());

    let relationship = ledger
        .feeling_of(entity.id(), player_id)
        .map(|edge| {
            format!(
                "Trust: {}, Impression: \"{}\", Tags: [{}]",
                edge.trust,
                edge.status,
                edge.tags.join(", ")
            )
        })
        .unwrap_or_else(|| "Neutral (Unknown)".to_string());

    let note = triggers
        .iter()
        .find(|t| t.npc_id == entity.id())
        .map(|t| format!("\n  [DIRECTOR NOTE]: MUST RESPOND! Reason: {}", t.trigger_reason))
        .unwrap_or_default();

    format!(
        "- [{name}] (Status: {status}, Doing: {doing})\n  Current Goals: {goals}\n  Relationship to Player: {relationship}\n  Recent History: {memories}{note}"
    )
}

fn apply_goal_updates(store: &mut WorldStore, updates: &[GoalUpdate], turn: u64) {
    for update in updates {
        let Some(mut entity) = store.get(&update.npc_id).cloned() else {
            continue;
        };
        let Some(sentient) = entity.as_sentient_mut() else {
            continue;
        };

        if let Some(goal) = sentient.goals.iter_mut().find(|g| g.id == update.goal_id) {
            goal.status = update.new_status;
            debug!(npc = %update.npc_id, goal = %update.goal_id, status = ?update.new_status, "goal updated");
        } else if let Some(description) = &update.new_goal_description {
            sentient.goals.push(Goal {
                id: update.goal_id.clone(),
                description: description.clone(),
                kind: None,
                target: None,
                priority: GoalPriority::Medium,
                status: GoalStatus::Active,
                created_turn: turn,
                started_at: None,
                duration_est: None,
                completed_at: None,
            });
            debug!(npc = %update.npc_id, goal = %update.goal_id, "goal created");
        } else {
            continue;
        }

        if let Err(e) = store.update(&update.npc_id, entity) {
            error!(npc = %update.npc_id, error = %e, "failed to persist goal update");
        }
    }
}
