//! File-backed world store.
//!
//! A keyed store of world entities with type and current-location
//! lookups, plus the relationship ledger, the event log, and the session
//! state: everything a snapshot must capture lives in one file. The
//! store holds the world in memory and writes the whole file at explicit
//! commit points (`flush`); turns are strictly sequential and the
//! orchestrator is the sole mutator, so there is never a concurrent
//! write to race against.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entity::{Entity, EntityId, EntityKind};
use crate::events::EventRecord;
use crate::ledger::Ledger;
use crate::session::SessionState;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Entity not found: {0}")]
    MissingEntity(EntityId),
}

/// On-disk layout of one world file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WorldFile {
    #[serde(default)]
    entities: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    relationships: Ledger,
    #[serde(default)]
    events: Vec<EventRecord>,
    #[serde(default)]
    session: SessionState,
}

/// The live world store, bound to one file.
#[derive(Debug)]
pub struct WorldStore {
    path: PathBuf,
    world: WorldFile,
}

impl WorldStore {
    /// Open the store at `path`, creating an empty world if the file does
    /// not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let world = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            WorldFile::default()
        };

        debug!(path = %path.display(), "world store opened");
        Ok(Self { path, world })
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current world to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.world)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Flush and release the store. The file must not be copied while a
    /// handle is live; close first.
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()?;
        debug!(path = %self.path.display(), "world store closed");
        Ok(())
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Insert or replace an entity.
    pub fn create(&mut self, entity: Entity) {
        self.world.entities.insert(entity.id().to_string(), entity);
    }

    /// Fetch an entity.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.world.entities.get(id)
    }

    /// Replace an existing entity; fails if the id is absent.
    pub fn update(&mut self, id: &str, entity: Entity) -> Result<(), StoreError> {
        if !self.world.entities.contains_key(id) {
            return Err(StoreError::MissingEntity(id.to_string()));
        }
        self.world.entities.insert(id.to_string(), entity);
        Ok(())
    }

    /// Whether an entity with this id exists.
    pub fn exists(&self, id: &str) -> bool {
        self.world.entities.contains_key(id)
    }

    /// Entities whose current location is `location_id`.
    pub fn list_by_location(&self, location_id: &str) -> Vec<&Entity> {
        self.world
            .entities
            .values()
            .filter(|e| e.current_location_id() == Some(location_id))
            .collect()
    }

    /// Case-insensitive exact match on display or simple name.
    pub fn find_by_name(&self, name: &str) -> Vec<&Entity> {
        let lower = name.to_lowercase();
        self.world
            .entities
            .values()
            .filter(|e| {
                e.display_name().to_lowercase() == lower || e.first_name().to_lowercase() == lower
            })
            .collect()
    }

    /// Ids of all entities of the given kind.
    pub fn ids_of_kind(&self, kind: EntityKind) -> Vec<EntityId> {
        self.world
            .entities
            .values()
            .filter(|e| e.kind() == kind)
            .map(|e| e.id().to_string())
            .collect()
    }

    /// All entities, for snapshot-equality style inspection.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.world.entities.values()
    }

    /// Shallow-merge a JSON partial onto an existing entity.
    ///
    /// `state` is merged key-by-key into the entity's state object; other
    /// top-level keys replace their counterparts. The merged value is
    /// re-normalized through the entity deserializer, so a patch that
    /// breaks the entity's shape is rejected as a whole.
    pub fn merge_partial(&mut self, id: &str, patch: &Map<String, Value>) -> Result<(), StoreError> {
        let current = self
            .world
            .entities
            .get(id)
            .ok_or_else(|| StoreError::MissingEntity(id.to_string()))?;

        let mut value = serde_json::to_value(current)?;
        for (key, incoming) in patch {
            if key == "state" {
                if let (Some(state), Some(patch_state)) =
                    (value.get_mut("state").and_then(Value::as_object_mut), incoming.as_object())
                {
                    for (k, v) in patch_state {
                        state.insert(k.clone(), v.clone());
                    }
                    continue;
                }
            }
            value[key] = incoming.clone();
        }

        let merged: Entity = serde_json::from_value(value)?;
        self.world.entities.insert(id.to_string(), merged);
        Ok(())
    }

    /// Remove every entity, edge, and event. Session counters reset to
    /// genesis; the game id is preserved.
    pub fn reset(&mut self) {
        let game_id = self.world.session.game_id.clone();
        self.world = WorldFile::default();
        self.world.session.game_id = game_id;
        warn!("world store reset");
    }

    // ========================================================================
    // Relationship ledger
    // ========================================================================

    pub fn ledger(&self) -> &Ledger {
        &self.world.relationships
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.world.relationships
    }

    // ========================================================================
    // Event log
    // ========================================================================

    /// Append an event record.
    pub fn log_event(&mut self, record: EventRecord) {
        self.world.events.push(record);
    }

    /// The full ordered event log.
    pub fn events(&self) -> &[EventRecord] {
        &self.world.events
    }

    // ========================================================================
    // Session state
    // ========================================================================

    pub fn session(&self) -> &SessionState {
        &self.world.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.world.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Location, Sentient};
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, WorldStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = WorldStore::open(dir.path().join("world.json")).expect("open");
        (dir, store)
    }

    #[test]
    fn test_create_get_update() {
        let (_dir, mut store) = temp_store();
        store.create(Entity::Location(Location::new("loc_a", "Atrium")));

        assert!(store.exists("loc_a"));
        assert_eq!(store.get("loc_a").unwrap().display_name(), "Atrium");

        let err = store.update("loc_missing", Entity::Location(Location::new("loc_missing", "X")));
        assert!(matches!(err, Err(StoreError::MissingEntity(_))));
    }

    #[test]
    fn test_location_and_name_lookup() {
        let (_dir, mut store) = temp_store();
        store.create(Entity::Location(Location::new("loc_a", "Atrium")));
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_mira",
            "Mira Vane",
            Some("loc_a".to_string()),
        )));

        assert_eq!(store.list_by_location("loc_a").len(), 1);
        assert_eq!(store.find_by_name("mira vane").len(), 1);
        assert_eq!(store.find_by_name("MIRA").len(), 1, "first name matches");
        assert!(store.find_by_name("nobody").is_empty());
    }

    #[test]
    fn test_merge_partial_shallow_merges_state() {
        let (_dir, mut store) = temp_store();
        store.create(Entity::Npc(Sentient::skeleton(
            "npc_mira",
            "Mira",
            Some("loc_a".to_string()),
        )));

        let patch = json!({ "state": { "emotional_state": "afraid" } });
        store
            .merge_partial("npc_mira", patch.as_object().unwrap())
            .unwrap();

        let npc = store.get("npc_mira").unwrap().as_sentient().unwrap();
        assert_eq!(npc.state.emotional_state, "afraid");
        assert_eq!(
            npc.state.current_location_id.as_deref(),
            Some("loc_a"),
            "unmentioned state keys survive"
        );
    }

    #[test]
    fn test_flush_and_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");

        let mut store = WorldStore::open(&path).unwrap();
        store.create(Entity::Location(Location::new("loc_a", "Atrium")));
        store.session_mut().turn = 7;
        store.close().unwrap();

        let reopened = WorldStore::open(&path).unwrap();
        assert!(reopened.exists("loc_a"));
        assert_eq!(reopened.session().turn, 7);
    }
}
