//! Cognitive outcome resolution for uncertain actions.
//!
//! One oracle call proposes a probability-weighted spectrum of candidate
//! outcomes with reasoning; the resolver selects exactly one. Every
//! malformed shape the oracle can produce (bad JSON, a legacy
//! single-outcome payload, an empty or fully-malformed spectrum) lands
//! on a deterministic local fallback, never an error.

use rand::Rng;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::engine::outcome::Outcome;
use crate::engine::resolver;
use crate::entity::Entity;
use crate::ledger::Ledger;
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};

/// The cognition stage's verdict for one action.
#[derive(Debug, Clone)]
pub struct CognitiveResolution {
    /// The oracle's stated reasoning, when it produced any.
    pub reasoning: Option<String>,
    pub outcome: Outcome,
}

/// Resolve an uncertain action into a single selected outcome.
pub async fn resolve_action<O: ContentOracle, R: Rng>(
    oracle: &O,
    rng: &mut R,
    input: &str,
    player: Option<&Entity>,
    location: Option<&Entity>,
    context_entities: &[&Entity],
    ledger: &Ledger,
) -> CognitiveResolution {
    info!(input, "resolving uncertain action");

    let player_desc = player
        .map(|p| {
            let visuals = p
                .as_sentient()
                .map(|s| s.appearance.visuals.as_str())
                .filter(|v| !v.is_empty())
                .unwrap_or("Unknown appearance");
            format!("Name: {}, Appearance: {}", p.display_name(), visuals)
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let inventory = player
        .and_then(|p| p.as_sentient())
        .map(|s| s.state.inventory.join(", "))
        .filter(|inv| !inv.is_empty())
        .unwrap_or_else(|| "Empty".to_string());

    let relationship_context = relationship_lines(player, context_entities, ledger);

    let scene = context_entities
        .iter()
        .map(|e| format!("- {} ({})", e.display_name(), e.kind().as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are the outcome engine for an interactive fiction simulation.\n\n\
         PLAYER ACTION: \"{input}\"\n\
         PLAYER: {player_desc}\n\
         INVENTORY: {inventory}\n\
         LOCATION: {location} - {location_desc}\n\
         ENTITIES PRESENT:\n{scene}\n\
         RELATIONSHIPS TOWARD PLAYER:\n{relationships}\n\n\
         Analyze the action, then propose 2-4 candidate outcomes with probability\n\
         weights summing to roughly 100.\n\n\
         Respond with JSON:\n\
         {{\"analysis\": {{\"reasoning\": string, \"difficulty\": string}},\n\
          \"possible_outcomes\": [{{\"id\": string, \"outcome_type\": string,\n\
            \"narrative_summary\": string, \"probability\": number,\n\
            \"world_changes\": object, \"duration_minutes\": number,\n\
            \"tags\": [string], \"npc_triggers\": [{{\"npc_id\": string,\n\
            \"trigger_reason\": string}}]}}]}}\n\n\
         world_changes keys must be real entity ids from the scene.",
        input = input,
        player_desc = player_desc,
        inventory = inventory,
        location = location.map(|l| l.display_name()).unwrap_or("Unknown"),
        location_desc = location
            .and_then(|l| l.as_location())
            .map(|l| l.description.as_str())
            .unwrap_or(""),
        scene = if scene.is_empty() { "None" } else { &scene },
        relationships = relationship_context,
    );

    let generated = match oracle
        .generate(
            &prompt,
            Role::Logic,
            GenerateOptions::strict_json().with_temperature(0.4),
        )
        .await
    {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "cognitive resolution call failed; using fallback");
            return CognitiveResolution {
                reasoning: None,
                outcome: Outcome::fallback_failure(),
            };
        }
    };

    let value: Value = match parse_json(&generated.text) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "cognitive response unparseable; using fallback");
            return CognitiveResolution {
                reasoning: None,
                outcome: Outcome::fallback_failure(),
            };
        }
    };

    let reasoning = value
        .pointer("/analysis/reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(raw_spectrum) = value.get("possible_outcomes").and_then(Value::as_array) {
        info!(count = raw_spectrum.len(), "received outcome spectrum");

        let candidates = resolver::curate(resolver::parse_candidates(raw_spectrum));
        if candidates.is_empty() {
            warn!("no valid outcomes in spectrum; generating fallback failure");
            return CognitiveResolution {
                reasoning,
                outcome: Outcome::fallback_failure(),
            };
        }

        let Some(selected) = resolver::select_weighted(rng, &candidates).cloned() else {
            return CognitiveResolution {
                reasoning,
                outcome: Outcome::fallback_failure(),
            };
        };
        info!(
            outcome_type = %selected.outcome_type,
            weight = selected.probability_weight,
            "selected outcome"
        );

        let mut outcome = selected;
        outcome.probability_weight = 100.0;
        return CognitiveResolution { reasoning, outcome };
    }

    // Legacy single-outcome shape: the oracle ignored the spectrum
    // instruction; use what it gave us.
    if let Some(single) = value.get("outcome") {
        if let Ok(outcome) = serde_json::from_value::<Outcome>(single.clone()) {
            warn!("oracle returned legacy single outcome; using it");
            return CognitiveResolution { reasoning, outcome };
        }
    }

    warn!("invalid cognitive response structure; using fallback");
    CognitiveResolution {
        reasoning,
        outcome: Outcome::fallback_failure(),
    }
}

fn relationship_lines(
    player: Option<&Entity>,
    context_entities: &[&Entity],
    ledger: &Ledger,
) -> String {
    let Some(player_id) = player.map(|p| p.id()) else {
        return "None".to_string();
    };

    let lines: Vec<String> = context_entities
        .iter()
        .filter(|e| e.kind() == crate::entity::EntityKind::Npc)
        .map(|npc| match ledger.feeling_of(npc.id(), player_id) {
            Some(edge) => {
                let recent = edge
                    .history
                    .iter()
                    .rev()
                    .take(2)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                format!(
                    "- {}: Trust={}, Tags=[{}], Recent=[{}]",
                    npc.display_name(),
                    edge.trust,
                    edge.tags.join(","),
                    recent
                )
            }
            None => format!("- {}: Unknown", npc.display_name()),
        })
        .collect();

    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("\n")
    }
}
