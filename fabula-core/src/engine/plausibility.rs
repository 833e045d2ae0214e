//! Pre-action plausibility gate.
//!
//! A cheap oracle check that can reject an action outright as physically
//! or genre impossible before any outcome resolution happens. Innocent
//! until proven guilty: if the check itself fails, the action is
//! allowed.

use serde::Deserialize;
use tracing::error;

use crate::entity::Entity;
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};

/// Verdict from the gate.
#[derive(Debug, Clone, Deserialize)]
pub struct PlausibilityResult {
    pub plausible: bool,
    #[serde(default)]
    pub refusal: Option<String>,
}

impl PlausibilityResult {
    fn allow() -> Self {
        Self {
            plausible: true,
            refusal: None,
        }
    }
}

/// Check whether `action` is possible for this player in this scene.
pub async fn check_action<O: ContentOracle>(
    oracle: &O,
    action: &str,
    tone: &str,
    player: Option<&Entity>,
    location: Option<&Entity>,
    npcs: &[&Entity],
    objects: &[&Entity],
) -> PlausibilityResult {
    let entity_list = npcs
        .iter()
        .chain(objects.iter())
        .map(|e| format!("{} ({})", e.display_name(), e.kind().as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let (health, emotion, inventory) = match player.and_then(|p| p.as_sentient()) {
        Some(s) => (
            s.state.health_status.clone(),
            s.state.emotional_state.clone(),
            if s.state.inventory.is_empty() {
                "None".to_string()
            } else {
                s.state.inventory.join(", ")
            },
        ),
        None => ("Healthy".to_string(), "Stable".to_string(), "None".to_string()),
    };

    let prompt = format!(
        "You are the plausibility gate for an interactive fiction engine.\n\
         Tone: {tone}\n\n\
         PROPOSED ACTION: \"{action}\"\n\
         LOCATION: {location}\n\
         ENTITIES PRESENT: {entities}\n\
         PLAYER: health={health}, emotion={emotion}, inventory=[{inventory}]\n\n\
         Reject ONLY actions that are physically impossible or break the genre's\n\
         reality. Risky, foolish, or rude actions are allowed; their outcomes are\n\
         resolved elsewhere.\n\n\
         Respond with JSON: {{\"plausible\": bool, \"refusal\": string | null}}",
        tone = tone,
        action = action,
        location = location.map(|l| l.display_name()).unwrap_or("Unknown Location"),
        entities = if entity_list.is_empty() { "None" } else { &entity_list },
        health = health,
        emotion = emotion,
        inventory = inventory,
    );

    match oracle
        .generate(&prompt, Role::Logic, GenerateOptions::strict_json())
        .await
    {
        Ok(generated) => match parse_json::<PlausibilityResult>(&generated.text) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "plausibility response unparseable; allowing action");
                PlausibilityResult::allow()
            }
        },
        Err(e) => {
            error!(error = %e, "plausibility check failed; allowing action");
            PlausibilityResult::allow()
        }
    }
}
