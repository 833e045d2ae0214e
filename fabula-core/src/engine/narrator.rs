//! Prose generation for resolved turns.
//!
//! The narrator turns a mechanical outcome plus scene context into
//! player-facing prose. Rejections get a simpler dedicated prompt, and
//! any generation failure falls back to the outcome's own summary, so
//! the player always receives narrative text.

use tracing::{error, info};

use crate::engine::agency::NpcAction;
use crate::engine::outcome::Outcome;
use crate::entity::{Entity, Opportunity};
use crate::provider::{ContentOracle, GenerateOptions, Role};

/// Scene context for narration.
pub struct NarrationContext<'a> {
    pub location: Option<&'a Entity>,
    pub clock_minutes: u64,
    pub tone: &'a str,
    pub opportunities: &'a [Opportunity],
    pub npcs: &'a [&'a Entity],
    pub npc_actions: &'a [NpcAction],
    pub ambient_event: Option<&'a Opportunity>,
}

/// Generate the turn's narration.
pub async fn generate_narration<O: ContentOracle>(
    oracle: &O,
    outcome: &Outcome,
    player_input: &str,
    context: &NarrationContext<'_>,
) -> String {
    info!(outcome_type = %outcome.outcome_type, tone = context.tone, "generating narration");

    // Impossible/nonsensical outcomes use a dedicated rejection prompt.
    let lowered = outcome.outcome_type.to_lowercase();
    if lowered == "nonsensical" || lowered == "impossible" {
        let prompt = format!(
            "A player in an interactive fiction tried: \"{input}\".\n\
             It cannot happen because: {reason}\n\
             Write 1-2 sentences of in-world narration gently refusing the attempt.",
            input = player_input,
            reason = outcome.summary,
        );
        return match oracle
            .generate(&prompt, Role::Creative, GenerateOptions::default())
            .await
        {
            Ok(generated) => generated.text.trim().to_string(),
            Err(e) => {
                error!(error = %e, "rejection narration failed; using summary");
                outcome.summary.clone()
            }
        };
    }

    let cast = cast_list(context);
    let action_lines = if context.npc_actions.is_empty() {
        "None".to_string()
    } else {
        context
            .npc_actions
            .iter()
            .map(|a| {
                let dialogue = a
                    .dialogue
                    .as_ref()
                    .map(|d| format!(" (Says: \"{d}\")"))
                    .unwrap_or_default();
                format!("[{}] {}: \"{}\"{}", a.action_type, a.npc_name, a.description, dialogue)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let ambient_block = context
        .ambient_event
        .map(|event| {
            format!(
                "\nAMBIENT EVENT TO WEAVE IN (match its severity: MINOR is a background\n\
                 detail, MAJOR demands attention):\n\
                 Description: {}\nSensory: {}\nSeverity: {:?}\n",
                event.description,
                event.sensory_details.as_deref().unwrap_or("None"),
                event.severity,
            )
        })
        .unwrap_or_default();

    let opportunities = if context.opportunities.is_empty() {
        "None".to_string()
    } else {
        context
            .opportunities
            .iter()
            .map(|o| format!("- {}", o.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let prompt = format!(
        "You are the narrator of an interactive fiction. Tone: {tone}.\n\n\
         PLAYER INPUT: \"{input}\"\n\
         LOCATION: {location}\n\
         TIME: minute {clock}\n\
         OUTCOME: {outcome_type} - {summary}\n\
         IMMEDIATE EFFECTS: {effects}\n\
         CAST:\n{cast}\n\
         NPC ACTIONS THIS TURN:\n{actions}\n\
         AMBIENT OPPORTUNITIES:\n{opportunities}\n\
         {ambient_block}\n\
         Write second-person present-tense narration of this outcome in 2-4\n\
         paragraphs. Depict every NPC action listed; invent nothing that\n\
         contradicts the outcome.",
        tone = context.tone,
        input = player_input,
        location = context
            .location
            .map(|l| l.display_name())
            .unwrap_or("Unknown"),
        clock = context.clock_minutes,
        outcome_type = outcome.outcome_type,
        summary = outcome.summary,
        effects = outcome.immediate_effects.join(", "),
        cast = cast,
        actions = action_lines,
        opportunities = opportunities,
        ambient_block = ambient_block,
    );

    match oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default())
        .await
    {
        Ok(generated) => generated.text.trim().to_string(),
        Err(e) => {
            error!(error = %e, "narration failed; falling back to summary");
            outcome.summary.clone()
        }
    }
}

fn cast_list(context: &NarrationContext<'_>) -> String {
    if context.npcs.is_empty() {
        return "None".to_string();
    }
    context
        .npcs
        .iter()
        .map(|npc| {
            let pending = context
                .npc_actions
                .iter()
                .find(|a| a.npc_id == npc.id())
                .map(|a| a.description.clone());
            let doing = pending
                .or_else(|| {
                    npc.as_sentient()
                        .and_then(|s| s.state.current_action.as_ref())
                        .map(|a| a.description.clone())
                })
                .unwrap_or_else(|| "Idle".to_string());
            let impression = npc
                .as_sentient()
                .map(|s| s.appearance.impression.as_str())
                .filter(|i| !i.is_empty())
                .unwrap_or("Generic");
            format!("- {} (Action: {doing}): Impression: {impression}", npc.display_name())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;

    fn context<'a>() -> NarrationContext<'a> {
        NarrationContext {
            location: None,
            clock_minutes: 0,
            tone: "neutral",
            opportunities: &[],
            npcs: &[],
            npc_actions: &[],
            ambient_event: None,
        }
    }

    #[tokio::test]
    async fn test_narration_returns_generated_prose() {
        let oracle = ScriptedOracle::with_responses(vec!["You swing and connect.".to_string()]);
        let outcome = Outcome::success("a punch lands");
        let text = generate_narration(&oracle, &outcome, "punch him", &context()).await;
        assert_eq!(text, "You swing and connect.");
    }

    #[tokio::test]
    async fn test_narration_falls_back_to_summary_on_error() {
        let oracle = ScriptedOracle::failing();
        let outcome = Outcome::success("a punch lands");
        let text = generate_narration(&oracle, &outcome, "punch him", &context()).await;
        assert_eq!(text, "a punch lands");
    }
}
