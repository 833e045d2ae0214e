//! On-demand entity instantiation.
//!
//! Entities enter the world lazily: skeletons for plausible references
//! the interpreter couldn't resolve, objects for freshly-entered empty
//! rooms, whole locations for dynamic travel, and post-narrative
//! extraction of genuinely new interactables from final prose. All of it
//! is oracle-driven and all of it degrades to "nothing created" on
//! failure.

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::entity::{generate_id, Entity, EntityId, Location, Sentient, WorldObject};
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};
use crate::store::WorldStore;

/// Narratives shorter than this are not worth extraction.
const MIN_EXTRACTION_LENGTH: usize = 50;

/// Generate a minimal skeleton for a plausible missing entity so the
/// turn can keep referring to it.
pub async fn generate_skeleton<O: ContentOracle>(
    oracle: &O,
    descriptor: &str,
    location_id: &str,
    location_name: &str,
    turn: u64,
) -> Option<Entity> {
    let prompt = format!(
        "A player referenced \"{descriptor}\" at {location_name}; it plausibly exists\n\
         but has no record yet. Invent a minimal version.\n\n\
         Respond with JSON: {{\"name\": string, \"type\": \"npc\" | \"object\",\n\
         \"description\": string}}",
        descriptor = descriptor,
        location_name = location_name,
    );

    #[derive(Deserialize)]
    struct SkeletonResponse {
        name: String,
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        description: String,
    }

    let generated = oracle
        .generate(&prompt, Role::Logic, GenerateOptions::strict_json())
        .await
        .map_err(|e| error!(error = %e, "skeleton generation failed"))
        .ok()?;
    let response: SkeletonResponse = parse_json(&generated.text)
        .map_err(|e| error!(error = %e, "skeleton response unparseable"))
        .ok()?;

    let entity = hydrate(&response.kind, &response.name, &response.description, location_id);
    info!(descriptor, id = %entity.id(), turn, "instantiated plausible entity");
    Some(entity)
}

/// Lazily fill an empty location with 3-5 interactive objects.
pub async fn populate_location<O: ContentOracle>(
    oracle: &O,
    location: &Location,
) -> Vec<Entity> {
    info!(name = %location.name, "lazily populating location");

    let prompt = format!(
        "You are the set designer for an interactive fiction game.\n\
         Populate a new location with interesting, interactive OBJECTS.\n\n\
         LOCATION: \"{name}\"\nDESCRIPTION: \"{desc}\"\n\n\
         Generate 3-5 distinct objects: some mundane, some interesting, at least one\n\
         hinting at recent activity.\n\n\
         Respond with a JSON array:\n\
         [{{\"name\": string, \"description\": string, \"keywords\": [string],\n\
           \"state\": object}}]",
        name = location.name,
        desc = location.description,
    );

    #[derive(Deserialize)]
    struct RawObject {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        state: Value,
    }

    let generated = match oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default().json())
        .await
    {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "populate location failed");
            return Vec::new();
        }
    };

    let raw_objects: Vec<RawObject> = match parse_json(&generated.text) {
        Ok(objects) => objects,
        Err(e) => {
            error!(error = %e, "populate response unparseable");
            return Vec::new();
        }
    };

    raw_objects
        .into_iter()
        .map(|raw| {
            let mut object = WorldObject::new(
                generate_id("obj"),
                raw.name,
                Some(location.entity_id.clone()),
            );
            object.description = raw.description;
            object.state.keywords = raw.keywords;
            if let Some(extra) = raw.state.as_object() {
                for (k, v) in extra {
                    object.state.extra.insert(k.clone(), v.clone());
                }
            }
            Entity::Object(object)
        })
        .collect()
}

/// Generate a new location for dynamic travel, plus any entities that
/// belong in it.
pub async fn generate_location<O: ContentOracle>(
    oracle: &O,
    target_name: &str,
    previous_location: &str,
    tone: &str,
) -> Option<(Location, Vec<Entity>)> {
    info!(destination = target_name, "generating new location");

    let prompt = format!(
        "Invent a location for an interactive fiction game. Tone: {tone}.\n\
         The player is traveling to \"{target}\" from \"{previous}\".\n\n\
         Respond with JSON: {{\"location\": {{\"name\": string, \"description\": string}},\n\
         \"entities\": [{{\"name\": string, \"type\": \"npc\" | \"object\",\n\
         \"description\": string}}]}}",
        tone = tone,
        target = target_name,
        previous = previous_location,
    );

    #[derive(Deserialize)]
    struct RawLocation {
        name: String,
        #[serde(default)]
        description: String,
    }
    #[derive(Deserialize)]
    struct RawInhabitant {
        name: String,
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default)]
        description: String,
    }
    #[derive(Deserialize)]
    struct LocationResponse {
        location: RawLocation,
        #[serde(default)]
        entities: Vec<RawInhabitant>,
    }

    let generated = oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default().json())
        .await
        .map_err(|e| error!(error = %e, "location generation failed"))
        .ok()?;
    let response: LocationResponse = parse_json(&generated.text)
        .map_err(|e| error!(error = %e, "location response unparseable"))
        .ok()?;

    let mut location = Location::new(generate_id("loc"), response.location.name);
    location.description = response.location.description;

    let inhabitants = response
        .entities
        .into_iter()
        .map(|raw| hydrate(&raw.kind, &raw.name, &raw.description, &location.entity_id))
        .collect();

    Some((location, inhabitants))
}

/// Extract genuinely new interactable entities from final narration and
/// persist them at the narration's location. Returns the created ids.
///
/// Runs on the continuity-corrected text only, so hallucinations the
/// validator removed never reach the store.
pub async fn extract_from_narrative<O: ContentOracle>(
    oracle: &O,
    store: &mut WorldStore,
    narrative: &str,
    location_id: &str,
    known_names: &[String],
    forbidden_names: &[String],
) -> Vec<EntityId> {
    if narrative.len() < MIN_EXTRACTION_LENGTH {
        return Vec::new();
    }

    let existing = if known_names.is_empty() {
        "None".to_string()
    } else {
        known_names.join(", ")
    };
    let forbidden = if forbidden_names.is_empty() {
        "None".to_string()
    } else {
        forbidden_names.join(", ")
    };

    let prompt = format!(
        "Extract NEW entities from this narration.\n\
         NARRATIVE: \"{narrative}\"\n\n\
         EXISTING ENTITIES (ignore these): {existing}\n\
         DO NOT EXTRACT (player/self): {forbidden}\n\n\
         Extract only named, interactable things the player could plausibly engage\n\
         with. Never extract body parts, clothing, abstractions, atmosphere, parts\n\
         of existing entities, or synonyms of existing entities. When uncertain,\n\
         don't extract.\n\n\
         Respond with a JSON array (possibly empty):\n\
         [{{\"name\": string, \"description\": string, \"type\": \"npc\" | \"object\",\n\
           \"reason\": string}}]",
        narrative = narrative,
        existing = existing,
        forbidden = forbidden,
    );

    #[derive(Deserialize)]
    struct Candidate {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(rename = "type", default)]
        kind: String,
    }

    let generated = match oracle
        .generate(&prompt, Role::Logic, GenerateOptions::strict_json())
        .await
    {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "narrative extraction failed");
            return Vec::new();
        }
    };

    let candidates: Vec<Candidate> = match parse_json(&generated.text) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "extraction response unparseable");
            return Vec::new();
        }
    };

    let mut created = Vec::new();
    for candidate in candidates {
        let normalized = candidate.name.to_lowercase();
        let normalized = normalized.trim();

        let duplicate = known_names.iter().any(|known| {
            let known = known.to_lowercase();
            let known = known.trim();
            known.contains(normalized) || normalized.contains(known)
        });
        if duplicate {
            info!(candidate = %candidate.name, "skipping duplicate extraction candidate");
            continue;
        }
        let forbidden = forbidden_names
            .iter()
            .any(|name| name.to_lowercase() == normalized);
        if forbidden {
            continue;
        }

        let entity = hydrate(&candidate.kind, &candidate.name, &candidate.description, location_id);
        info!(id = %entity.id(), name = %candidate.name, "extracted new entity from narrative");
        created.push(entity.id().to_string());
        store.create(entity);
    }
    created
}

/// Deepen a skeleton entity by one generation level.
///
/// Sentients created on demand start at `minimal` depth; when the story
/// keeps returning to one, this fills in appearance, impression, and a
/// starting goal. Returns `false` when the entity is already fully
/// generated, isn't sentient, or the oracle produced nothing usable.
pub async fn flesh_out_entity<O: ContentOracle>(
    oracle: &O,
    store: &mut WorldStore,
    entity_id: &str,
) -> bool {
    use crate::entity::{Goal, GoalPriority, GoalStatus, GeneratedDepth};

    let Some(mut entity) = store.get(entity_id).cloned() else {
        return false;
    };
    let Some(sentient) = entity.as_sentient_mut() else {
        return false;
    };
    let next_depth = match sentient.generated_depth {
        GeneratedDepth::Minimal => GeneratedDepth::Basic,
        GeneratedDepth::Basic => GeneratedDepth::Detailed,
        GeneratedDepth::Detailed => GeneratedDepth::Full,
        GeneratedDepth::Full => return false,
    };

    let prompt = format!(
        "Flesh out a character for an interactive fiction game.\n\
         NAME: {name}\n\
         KNOWN SO FAR: {visuals}\n\n\
         Respond with JSON: {{\"visuals\": string, \"impression\": string,\n\
         \"goal\": string | null}}",
        name = sentient.name.display,
        visuals = if sentient.appearance.visuals.is_empty() {
            "Nothing"
        } else {
            &sentient.appearance.visuals
        },
    );

    #[derive(Deserialize)]
    struct FleshOutResponse {
        #[serde(default)]
        visuals: String,
        #[serde(default)]
        impression: String,
        #[serde(default)]
        goal: Option<String>,
    }

    let Ok(generated) = oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default().json())
        .await
    else {
        error!(entity = entity_id, "flesh-out generation failed");
        return false;
    };
    let Ok(response) = parse_json::<FleshOutResponse>(&generated.text) else {
        error!(entity = entity_id, "flesh-out response unparseable");
        return false;
    };

    if !response.visuals.is_empty() {
        sentient.appearance.visuals = response.visuals;
    }
    if !response.impression.is_empty() {
        sentient.appearance.impression = response.impression;
    }
    if let Some(description) = response.goal {
        sentient.goals.push(Goal {
            id: generate_id("goal"),
            description,
            kind: None,
            target: None,
            priority: GoalPriority::Medium,
            status: GoalStatus::Active,
            created_turn: 0,
            started_at: None,
            duration_est: None,
            completed_at: None,
        });
    }
    sentient.generated_depth = next_depth;

    if let Err(e) = store.update(entity_id, entity) {
        warn!(entity = entity_id, error = %e, "failed to persist fleshed-out entity");
        return false;
    }
    info!(entity = entity_id, depth = ?next_depth, "entity fleshed out");
    true
}

/// Turn a loose `(type, name, description)` triple into a typed entity
/// positioned at `location_id`. Unknown types become objects.
fn hydrate(kind: &str, name: &str, description: &str, location_id: &str) -> Entity {
    if kind.eq_ignore_ascii_case("npc") {
        let mut sentient =
            Sentient::skeleton(generate_id("npc"), name, Some(location_id.to_string()));
        sentient.appearance.visuals = description.to_string();
        Entity::Npc(sentient)
    } else {
        let mut object =
            WorldObject::new(generate_id("obj"), name, Some(location_id.to_string()));
        object.description = description.to_string();
        Entity::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, WorldStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorldStore::open(dir.path().join("world.json")).unwrap();
        (dir, store)
    }

    const LONG_NARRATIVE: &str =
        "A manila folder lies on the desk, stamped CONFIDENTIAL, beside a cracked mug.";

    #[tokio::test]
    async fn test_short_narrative_skips_extraction() {
        let (_dir, mut store) = store();
        let oracle = ScriptedOracle::failing();
        let created =
            extract_from_narrative(&oracle, &mut store, "Too short.", "loc_a", &[], &[]).await;
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_dedups_and_forbids() {
        let (_dir, mut store) = store();
        let oracle = ScriptedOracle::with_responses(vec![json!([
            {"name": "Manila Folder", "description": "Stamped CONFIDENTIAL", "type": "object",
             "reason": "interactable"},
            {"name": "Desk", "description": "A desk", "type": "object", "reason": "dup"},
            {"name": "Agent Cipher", "description": "the player", "type": "npc", "reason": "no"}
        ])
        .to_string()]);

        let created = extract_from_narrative(
            &oracle,
            &mut store,
            LONG_NARRATIVE,
            "loc_office",
            &["Mahogany Desk".to_string()],
            &["Agent Cipher".to_string()],
        )
        .await;

        assert_eq!(created.len(), 1);
        let entity = store.get(&created[0]).unwrap();
        assert_eq!(entity.display_name(), "Manila Folder");
        assert_eq!(entity.current_location_id(), Some("loc_office"));
    }

    #[tokio::test]
    async fn test_populate_location_hydrates_objects() {
        let oracle = ScriptedOracle::with_responses(vec![json!([
            {"name": "Mahogany Desk", "description": "Heavy and scratched",
             "keywords": ["desk"], "state": {"searchable": true}}
        ])
        .to_string()]);

        let location = Location::new("loc_office", "Office");
        let entities = populate_location(&oracle, &location).await;

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].current_location_id(), Some("loc_office"));
        let object = entities[0].as_object().unwrap();
        assert_eq!(object.state.extra["searchable"], true);
    }

    #[tokio::test]
    async fn test_flesh_out_deepens_generation() {
        use crate::entity::{GeneratedDepth, Sentient};

        let (_dir, mut store) = store();
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_mira",
            "Mira",
            Some("loc_a".to_string()),
        )));

        let oracle = ScriptedOracle::with_responses(vec![json!({
            "visuals": "Wiry, ink-stained fingers, a guarded stare",
            "impression": "Sharper than she lets on",
            "goal": "Find out who emptied the strongbox"
        })
        .to_string()]);

        assert!(flesh_out_entity(&oracle, &mut store, "npc_mira").await);

        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert_eq!(mira.generated_depth, GeneratedDepth::Basic);
        assert!(mira.appearance.visuals.contains("ink-stained"));
        assert_eq!(mira.goals.len(), 1);

        // A failing oracle leaves the record untouched.
        assert!(!flesh_out_entity(&ScriptedOracle::failing(), &mut store, "npc_mira").await);
        let mira = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert_eq!(mira.generated_depth, GeneratedDepth::Basic);
    }

    #[tokio::test]
    async fn test_generate_location_links_inhabitants() {
        let oracle = ScriptedOracle::with_responses(vec![json!({
            "location": {"name": "Docks", "description": "Fog and rust"},
            "entities": [{"name": "Dockhand", "type": "npc", "description": "Weathered"}]
        })
        .to_string()]);

        let (location, inhabitants) =
            generate_location(&oracle, "the docks", "The Bar", "noir").await.unwrap();
        assert_eq!(location.name, "Docks");
        assert_eq!(inhabitants.len(), 1);
        assert_eq!(
            inhabitants[0].current_location_id(),
            Some(location.entity_id.as_str())
        );
    }
}
