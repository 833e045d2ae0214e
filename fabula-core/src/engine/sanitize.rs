//! Oracle-output sanitization: ID reconciliation and structural
//! validation of state-change payloads.
//!
//! The oracle routinely hallucinates entity ids. Reconciliation rewrites
//! them to canonical ids where a fuzzy match against the turn's context
//! exists; anything left unresolved is rejected by the structural gate,
//! which blocks the delta from ever being committed.

use serde_json::Value;
use tracing::{info, warn};

use crate::entity::Entity;
use crate::store::WorldStore;

/// Category names allowed as top-level delta keys alongside entity ids.
pub const CATEGORY_WHITELIST: [&str; 6] =
    ["npc", "location", "item", "object", "time", "opportunities"];

/// Categories whose inner keys are entity ids subject to reconciliation.
const ENTITY_CATEGORIES: [&str; 4] = ["npc", "object", "location", "item"];

/// Rewrite hallucinated entity-id keys in `changes` against the turn's
/// context entities.
///
/// A key that does not resolve in the store is matched by substring
/// containment in either direction against each context entity's id, or
/// by case-insensitive containment of the entity's display/first name.
/// The first match wins and the key is rewritten to the canonical id;
/// no match leaves the key in place for the structural gate to reject.
/// Sanitizing an already-valid payload is a no-op.
pub fn reconcile_ids(changes: &mut Value, context: &[&Entity], store: &WorldStore) {
    let Some(top) = changes.as_object_mut() else {
        return;
    };

    // Inner keys of the entity-bearing categories.
    for category in ENTITY_CATEGORIES {
        if let Some(Value::Object(category_changes)) = top.get_mut(category) {
            let keys: Vec<String> = category_changes.keys().cloned().collect();
            for original in keys {
                if store.exists(&original) || context.iter().any(|e| e.id() == original) {
                    continue;
                }
                if let Some(canonical) = fuzzy_match(&original, context) {
                    info!(from = %original, to = %canonical, "reconciled hallucinated id");
                    if let Some(data) = category_changes.remove(&original) {
                        category_changes.insert(canonical, data);
                    }
                } else {
                    warn!(id = %original, "could not reconcile id; leaving for validation");
                }
            }
        }
    }

    // Top-level keys that are neither categories nor known ids.
    let keys: Vec<String> = top.keys().cloned().collect();
    for original in keys {
        if CATEGORY_WHITELIST.contains(&original.as_str()) || store.exists(&original) {
            continue;
        }
        if let Some(canonical) = fuzzy_match(&original, context) {
            info!(from = %original, to = %canonical, "reconciled hallucinated id");
            if let Some(data) = top.remove(&original) {
                top.insert(canonical, data);
            }
        } else {
            warn!(id = %original, "could not reconcile id; leaving for validation");
        }
    }
}

fn fuzzy_match(hallucinated: &str, context: &[&Entity]) -> Option<String> {
    let lower = hallucinated.to_lowercase();
    context
        .iter()
        .find(|e| {
            let id = e.id();
            id.contains(hallucinated)
                || hallucinated.contains(id)
                || lower.contains(&e.display_name().to_lowercase())
                || lower.contains(&e.first_name().to_lowercase())
        })
        .map(|e| e.id().to_string())
}

/// Hard structural gate over a state-change payload.
///
/// Every top-level key must be a real entity id or a whitelisted
/// category; inside a category, every key containing an underscore must
/// itself resolve to a real entity id. Failure carries a reason naming
/// the offending key and must prevent the delta from being committed.
pub fn validate_structure(changes: &Value, store: &WorldStore) -> Result<(), String> {
    let Some(top) = changes.as_object() else {
        return Ok(());
    };

    for (key, value) in top {
        if store.exists(key) {
            continue;
        }

        if CATEGORY_WHITELIST.contains(&key.as_str()) {
            if let Some(inner) = value.as_object() {
                for potential_id in inner.keys() {
                    if potential_id.contains('_') && !store.exists(potential_id) {
                        warn!(id = %potential_id, "structural validation failed");
                        return Err(format!(
                            "state change references non-existent entity id: {potential_id}"
                        ));
                    }
                }
            }
            continue;
        }

        return Err(format!(
            "state change references invalid entity id or category: {key}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Location, Sentient};
    use serde_json::json;

    fn store_with_mira() -> (tempfile::TempDir, WorldStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WorldStore::open(dir.path().join("world.json")).unwrap();
        store.create(Entity::Location(Location::new("loc_bar", "The Bar")));
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_mira_7c2f",
            "Mira Vane",
            Some("loc_bar".to_string()),
        )));
        (dir, store)
    }

    #[test]
    fn test_reconcile_is_idempotent_on_valid_payload() {
        let (_dir, store) = store_with_mira();
        let mira = store.get("npc_mira_7c2f").unwrap().clone();
        let context = vec![&mira];

        let mut changes = json!({ "npc": { "npc_mira_7c2f": { "state": { "emotional_state": "afraid" } } } });
        let before = changes.clone();
        reconcile_ids(&mut changes, &context, &store);
        assert_eq!(changes, before);
    }

    #[test]
    fn test_reconcile_rewrites_substring_match() {
        let (_dir, store) = store_with_mira();
        let mira = store.get("npc_mira_7c2f").unwrap().clone();
        let context = vec![&mira];

        let mut changes = json!({ "npc": { "npc_mira": { "state": { "emotional_state": "afraid" } } } });
        reconcile_ids(&mut changes, &context, &store);

        assert!(changes["npc"].get("npc_mira").is_none());
        assert_eq!(
            changes["npc"]["npc_mira_7c2f"]["state"]["emotional_state"],
            "afraid"
        );
    }

    #[test]
    fn test_reconcile_matches_display_name() {
        let (_dir, store) = store_with_mira();
        let mira = store.get("npc_mira_7c2f").unwrap().clone();
        let context = vec![&mira];

        let mut changes = json!({ "npc": { "the_mira_vane_entity": {} } });
        reconcile_ids(&mut changes, &context, &store);
        assert!(changes["npc"].get("npc_mira_7c2f").is_some());
    }

    #[test]
    fn test_structure_rejects_unknown_top_level_key() {
        let (_dir, store) = store_with_mira();
        let changes = json!({ "npc_ghost": { "state": {} } });
        let err = validate_structure(&changes, &store).unwrap_err();
        assert!(err.contains("npc_ghost"), "reason names the key: {err}");
    }

    #[test]
    fn test_structure_rejects_unresolved_inner_id() {
        let (_dir, store) = store_with_mira();
        let changes = json!({ "npc": { "npc_ghost_1": { "state": {} } } });
        let err = validate_structure(&changes, &store).unwrap_err();
        assert!(err.contains("npc_ghost_1"));
    }

    #[test]
    fn test_structure_accepts_entity_ids_and_categories() {
        let (_dir, store) = store_with_mira();
        let changes = json!({
            "npc_mira_7c2f": { "state": { "emotional_state": "afraid" } },
            "time": { "current_time": 90 },
            "npc": { "npc_mira_7c2f": { "state": {} } }
        });
        assert!(validate_structure(&changes, &store).is_ok());
    }

    #[test]
    fn test_structure_accepts_null_payload() {
        let (_dir, store) = store_with_mira();
        assert!(validate_structure(&Value::Null, &store).is_ok());
    }
}
