//! Oracle-backed action interpretation.
//!
//! The first oracle call of a turn: normalize free-text input, classify
//! its complexity, resolve entity references, and flag travel intent or
//! missing-but-plausible entities. Interpretation never fails; a broken
//! oracle response degrades to `GIBBERISH` so the pipeline knows the
//! interpreter had nothing usable.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::entity::Entity;
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};

/// How confidently the input was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Understanding {
    Clear,
    Ambiguous,
    Gibberish,
}

/// How involved resolving the action will be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Trivial,
    Normal,
    Complex,
}

/// A resolved reference from the input to a known entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReference {
    #[serde(default)]
    pub mentioned_as: String,
    #[serde(default)]
    pub entity_name: String,
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub confidence: f64,
}

/// A referenced entity that does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingEntity {
    pub descriptor: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub plausible: bool,
}

/// The interpreter's reading of one player input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    pub understanding: Understanding,
    #[serde(default)]
    pub normalized_input: String,
    #[serde(default)]
    pub complexity: Option<Complexity>,

    #[serde(default)]
    pub referenced_entities: Vec<EntityReference>,

    #[serde(default)]
    pub ambiguity_explanation: Option<String>,
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(default)]
    pub gibberish_reason: Option<String>,

    #[serde(default)]
    pub missing_entities: Vec<MissingEntity>,

    #[serde(default)]
    pub travel_intent: bool,
    #[serde(default)]
    pub target_location: Option<String>,
}

impl Interpretation {
    /// Fallback when interpretation itself broke down.
    pub fn gibberish(input: &str, reason: impl Into<String>) -> Self {
        Self {
            understanding: Understanding::Gibberish,
            normalized_input: input.to_string(),
            complexity: None,
            referenced_entities: Vec::new(),
            ambiguity_explanation: None,
            clarification_question: None,
            gibberish_reason: Some(reason.into()),
            missing_entities: Vec::new(),
            travel_intent: false,
            target_location: None,
        }
    }
}

/// Scene facts handed to the interpreter.
pub struct InterpreterContext<'a> {
    pub location_name: &'a str,
    pub location_desc: &'a str,
    pub visible_exits: &'a [String],
    pub npcs: &'a [&'a Entity],
    pub objects: &'a [&'a Entity],
    pub inventory: &'a [String],
    pub recent_history: &'a [String],
}

/// Interpret one player input against the current scene.
pub async fn interpret<O: ContentOracle>(
    oracle: &O,
    input: &str,
    context: &InterpreterContext<'_>,
) -> Interpretation {
    info!(input, "interpreting player input");

    let npcs = names_or_none(context.npcs);
    let objects = names_or_none(context.objects);
    let exits = if context.visible_exits.is_empty() {
        "None".to_string()
    } else {
        context.visible_exits.join(", ")
    };
    let inventory = if context.inventory.is_empty() {
        "Empty".to_string()
    } else {
        context.inventory.join(", ")
    };
    let history = if context.recent_history.is_empty() {
        "None".to_string()
    } else {
        context.recent_history.join("\n")
    };

    let prompt = format!(
        "You are the action interpreter for an interactive fiction engine.\n\n\
         PLAYER INPUT: \"{input}\"\n\n\
         SCENE:\n\
         Location: {location} - {desc}\n\
         Visible exits: {exits}\n\
         NPCs present: {npcs}\n\
         Objects present: {objects}\n\
         Inventory: {inventory}\n\
         Recent narration:\n{history}\n\n\
         Classify the input and respond with JSON:\n\
         {{\"understanding\": \"CLEAR\" | \"AMBIGUOUS\" | \"GIBBERISH\",\n\
          \"normalized_input\": string,\n\
          \"complexity\": \"TRIVIAL\" | \"NORMAL\" | \"COMPLEX\",\n\
          \"referenced_entities\": [{{\"mentioned_as\": string, \"entity_name\": string,\n\
            \"entity_id\": string, \"entity_type\": string, \"confidence\": number}}],\n\
          \"ambiguity_explanation\": string | null,\n\
          \"missing_entities\": [{{\"descriptor\": string, \"reason\": string, \"plausible\": bool}}],\n\
          \"travel_intent\": bool, \"target_location\": string | null}}\n\n\
         Rules: simple observation/movement is TRIVIAL; anything contested or risky is\n\
         COMPLEX. Set travel_intent only for journeys beyond the visible exits.\n\
         List missing_entities when the player references something not in the scene,\n\
         marking plausible=true only if it would believably be here.",
        input = input,
        location = context.location_name,
        desc = context.location_desc,
        exits = exits,
        npcs = npcs,
        objects = objects,
        inventory = inventory,
        history = history,
    );

    match oracle
        .generate(&prompt, Role::Logic, GenerateOptions::strict_json())
        .await
    {
        Ok(generated) => match parse_json::<Interpretation>(&generated.text) {
            Ok(mut interpretation) => {
                if interpretation.normalized_input.is_empty() {
                    interpretation.normalized_input = input.to_string();
                }
                interpretation
            }
            Err(e) => {
                error!(error = %e, "failed to parse interpretation");
                Interpretation::gibberish(input, "Failed to parse action - system error")
            }
        },
        Err(e) => {
            error!(error = %e, "interpreter oracle call failed");
            Interpretation::gibberish(input, "Failed to parse action - system error")
        }
    }
}

fn names_or_none(entities: &[&Entity]) -> String {
    if entities.is_empty() {
        "None".to_string()
    } else {
        entities
            .iter()
            .map(|e| e.display_name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpretation_parses_minimal_response() {
        let parsed: Interpretation = serde_json::from_str(
            r#"{"understanding": "CLEAR", "normalized_input": "go to B", "complexity": "TRIVIAL"}"#,
        )
        .unwrap();
        assert_eq!(parsed.understanding, Understanding::Clear);
        assert_eq!(parsed.complexity, Some(Complexity::Trivial));
        assert!(parsed.referenced_entities.is_empty());
    }

    #[test]
    fn test_gibberish_fallback_keeps_input() {
        let fallback = Interpretation::gibberish("asdf qwer", "unparseable");
        assert_eq!(fallback.understanding, Understanding::Gibberish);
        assert_eq!(fallback.normalized_input, "asdf qwer");
    }
}
