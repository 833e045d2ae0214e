//! Post-narration continuity checks.
//!
//! A second, stricter oracle call reviews the rendered prose against the
//! canonical scene. Enforcement is best-effort: a failure with a
//! supplied correction replaces the text, and everything else (no
//! correction offered, unparseable response, oracle error) fails open.
//! Availability beats strictness here; the structural gate is the hard
//! one.

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::engine::agency::NpcAction;
use crate::engine::outcome::Outcome;
use crate::entity::Entity;
use crate::events::EventRecord;
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};

/// How many recent look/move events feed the retroactive-causality
/// check.
pub const OBSERVATION_WINDOW: usize = 5;

/// Scene facts handed to the narrative validator.
pub struct ContinuityContext<'a> {
    pub location_desc: &'a str,
    /// Prior narrations, oldest first; only the last two are shown.
    pub previous_narrations: &'a [String],
    pub npc_actions: &'a [NpcAction],
}

/// Verdict from the narrative validator.
#[derive(Debug, Clone)]
pub struct ContinuityVerdict {
    pub valid: bool,
    pub reason: Option<String>,
    pub corrected_narrative: Option<String>,
}

impl ContinuityVerdict {
    fn pass() -> Self {
        Self {
            valid: true,
            reason: None,
            corrected_narrative: None,
        }
    }
}

#[derive(Deserialize)]
struct ValidatorResponse {
    #[serde(default)]
    validation_passed: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    corrected_narration: Option<String>,
}

/// Check rendered prose for CRITICAL/MAJOR continuity issues only:
/// hallucinated objects, physically impossible actions, direct
/// contradictions of ordered NPC actions. Minor embellishments (added
/// dialogue, gestures) must never be flagged.
pub async fn validate_narrative<O: ContentOracle>(
    oracle: &O,
    narrative: &str,
    present: &[&Entity],
    context: ContinuityContext<'_>,
) -> ContinuityVerdict {
    let entity_list = if present.is_empty() {
        "None".to_string()
    } else {
        present
            .iter()
            .map(|e| {
                let action = e
                    .as_sentient()
                    .and_then(|s| s.state.current_action.as_ref())
                    .map(|a| format!(" (Action: {})", a.description))
                    .unwrap_or_default();
                format!("- {}{}", e.display_name(), action)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let action_list = if context.npc_actions.is_empty() {
        "None".to_string()
    } else {
        context
            .npc_actions
            .iter()
            .map(|a| format!("- {}: {} -> \"{}\"", a.npc_name, a.action_type, a.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let recent = context
        .previous_narrations
        .iter()
        .rev()
        .take(2)
        .rev()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are a strict state validator for an interactive fiction engine.\n\
         Review the narration below against the canonical scene state.\n\n\
         LOCATION: {location}\n\
         PRESENT ENTITIES:\n{entities}\n\
         ORDERED NPC ACTIONS:\n{actions}\n\
         PREVIOUS NARRATION:\n{recent}\n\n\
         NARRATION TO REVIEW:\n{narrative}\n\n\
         Flag ONLY CRITICAL or MAJOR issues: objects that do not exist in the scene,\n\
         physically impossible actions, direct contradictions of the ordered NPC actions.\n\
         NEVER flag minor embellishments such as added dialogue or gestures.\n\n\
         Respond with JSON: {{\"validation_passed\": bool, \"issues\": [string],\n\
         \"corrected_narration\": string | null}}",
        location = context.location_desc,
        entities = entity_list,
        actions = action_list,
        recent = if recent.is_empty() { "None" } else { &recent },
        narrative = narrative,
    );

    let generated = match oracle
        .generate(&prompt, Role::Logic, GenerateOptions::strict_json())
        .await
    {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "narrative validation call failed; failing open");
            return ContinuityVerdict::pass();
        }
    };

    let response: ValidatorResponse = match parse_json(&generated.text) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "narrative validator returned unparseable JSON; failing open");
            return ContinuityVerdict::pass();
        }
    };

    if response.validation_passed {
        return ContinuityVerdict::pass();
    }

    warn!(issues = ?response.issues, "narrative validator flagged issues");
    match response.corrected_narration {
        Some(corrected) if !corrected.trim().is_empty() => ContinuityVerdict {
            valid: false,
            reason: Some("narrative validation failed".to_string()),
            corrected_narrative: Some(corrected),
        },
        // Flagged but no correction offered: allow the original through.
        _ => ContinuityVerdict::pass(),
    }
}

/// Retroactive-causality check over the recent observation window.
///
/// Intended to catch narration that asserts an entity was present at a
/// location/time the player previously observed as empty. The event-log
/// orderings and the [`OBSERVATION_WINDOW`] interface exist for this;
/// the check itself is an always-pass baseline until the observation
/// records carry explicit entities-seen data.
pub fn check_retroactive_causality(
    _outcome: &Outcome,
    observations: &[&EventRecord],
) -> Result<(), String> {
    debug!(
        window = observations.len().min(OBSERVATION_WINDOW),
        "retroactive causality check (pass-through)"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retroactive_causality_always_passes() {
        let outcome = Outcome::success("moved a body");
        let record = EventRecord::new(3, "loc_a", "player", "move", json!({}));
        let observations = vec![&record];
        assert!(check_retroactive_causality(&outcome, &observations).is_ok());
    }

    #[test]
    fn test_validator_response_shape() {
        let parsed: ValidatorResponse = serde_json::from_str(
            r#"{"validation_passed": false, "issues": ["x"], "corrected_narration": "fixed"}"#,
        )
        .unwrap();
        assert!(!parsed.validation_passed);
        assert_eq!(parsed.corrected_narration.as_deref(), Some("fixed"));
    }
}
