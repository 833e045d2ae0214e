//! Outcome records flowing through the turn pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::agency::NpcAction;

/// Outcome type used for locally-synthesized successes.
pub const OUTCOME_SUCCESS: &str = "SUCCESS";
/// Outcome type used for locally-synthesized failures.
pub const OUTCOME_FAILURE: &str = "FAILURE";

/// A note attached to an outcome that obliges a specific NPC to respond.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTrigger {
    pub npc_id: String,
    #[serde(default)]
    pub trigger_reason: String,
}

/// One resolved (or candidate) consequence of a player action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_type: String,

    /// Short mechanical summary of what happened.
    #[serde(rename = "narrative_summary", alias = "mechanic_summary")]
    pub summary: String,

    #[serde(default = "default_weight")]
    pub probability_weight: f64,

    #[serde(default)]
    pub immediate_effects: Vec<String>,

    /// Oracle-authored state-change payload, pending sanitization.
    #[serde(default)]
    pub world_state_changes: Value,

    #[serde(default)]
    pub duration_minutes: Option<u64>,

    /// Ripple tags (`VIOLENCE`, `THEFT`, ...).
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub npc_triggers: Vec<NpcTrigger>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_entities: Vec<String>,

    /// NPC behavior attached after agency resolution, for the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub npc_actions: Vec<NpcAction>,
}

fn default_weight() -> f64 {
    100.0
}

impl Outcome {
    fn canned(outcome_type: &str, summary: impl Into<String>) -> Self {
        Self {
            outcome_type: outcome_type.to_string(),
            summary: summary.into(),
            probability_weight: 100.0,
            immediate_effects: Vec::new(),
            world_state_changes: Value::Null,
            duration_minutes: None,
            tags: Vec::new(),
            npc_triggers: Vec::new(),
            affected_entities: Vec::new(),
            npc_actions: Vec::new(),
        }
    }

    /// A deterministic local failure with zero duration.
    pub fn failure(summary: impl Into<String>) -> Self {
        let mut outcome = Self::canned(OUTCOME_FAILURE, summary);
        outcome.duration_minutes = Some(0);
        outcome
    }

    /// A deterministic local success.
    pub fn success(summary: impl Into<String>) -> Self {
        Self::canned(OUTCOME_SUCCESS, summary)
    }

    /// The generic fallback when the oracle returns nothing usable.
    pub fn fallback_failure() -> Self {
        Self::canned(OUTCOME_FAILURE, "You attempt it, but something goes wrong.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_accepts_either_wire_name() {
        let a: Outcome = serde_json::from_str(
            r#"{"outcome_type":"SUCCESS","narrative_summary":"it worked"}"#,
        )
        .unwrap();
        let b: Outcome = serde_json::from_str(
            r#"{"outcome_type":"SUCCESS","mechanic_summary":"it worked"}"#,
        )
        .unwrap();
        assert_eq!(a.summary, "it worked");
        assert_eq!(b.summary, "it worked");
    }

    #[test]
    fn test_failure_is_zero_duration() {
        let outcome = Outcome::failure("nope");
        assert_eq!(outcome.outcome_type, OUTCOME_FAILURE);
        assert_eq!(outcome.duration_minutes, Some(0));
    }
}
