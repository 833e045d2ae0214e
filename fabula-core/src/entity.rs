//! World entity model.
//!
//! Entities are a tagged union over players, NPCs, creatures, objects,
//! and locations. The oracle and imported content produce loosely-shaped
//! records (`name` as a bare string or a structured record,
//! `relationships` as an array or a stringified JSON blob); those shapes
//! are normalized once, at deserialization, and the in-memory model is
//! fully typed from then on.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable identifier for a world entity.
pub type EntityId = String;

/// Generate a fresh entity id with a type prefix (e.g. `obj_9f2c...`).
pub fn generate_id(prefix: &str) -> EntityId {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// The kind of a world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Npc,
    Creature,
    Object,
    Location,
}

impl EntityKind {
    /// Whether this kind carries the sentient field set.
    pub fn is_sentient(&self) -> bool {
        matches!(self, EntityKind::Player | EntityKind::Npc | EntityKind::Creature)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Npc => "npc",
            EntityKind::Creature => "creature",
            EntityKind::Object => "object",
            EntityKind::Location => "location",
        }
    }
}

/// A world entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Entity {
    Player(Sentient),
    Npc(Sentient),
    Creature(Sentient),
    Object(WorldObject),
    Location(Location),
}

impl Entity {
    /// The entity's stable id.
    pub fn id(&self) -> &str {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => &s.entity_id,
            Entity::Object(o) => &o.entity_id,
            Entity::Location(l) => &l.entity_id,
        }
    }

    /// The entity's kind tag.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Player(_) => EntityKind::Player,
            Entity::Npc(_) => EntityKind::Npc,
            Entity::Creature(_) => EntityKind::Creature,
            Entity::Object(_) => EntityKind::Object,
            Entity::Location(_) => EntityKind::Location,
        }
    }

    /// Display name, regardless of shape.
    pub fn display_name(&self) -> &str {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => &s.name.display,
            Entity::Object(o) => &o.name,
            Entity::Location(l) => &l.name,
        }
    }

    /// First/simple name used for fuzzy reference matching.
    pub fn first_name(&self) -> &str {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => &s.name.first,
            Entity::Object(o) => &o.name,
            Entity::Location(l) => &l.name,
        }
    }

    /// Where the entity currently is, if it is the kind that has a position.
    pub fn current_location_id(&self) -> Option<&str> {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => {
                s.state.current_location_id.as_deref()
            }
            Entity::Object(o) => o.state.current_location_id.as_deref(),
            Entity::Location(_) => None,
        }
    }

    /// Sentient view, if applicable.
    pub fn as_sentient(&self) -> Option<&Sentient> {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable sentient view, if applicable.
    pub fn as_sentient_mut(&mut self) -> Option<&mut Sentient> {
        match self {
            Entity::Player(s) | Entity::Npc(s) | Entity::Creature(s) => Some(s),
            _ => None,
        }
    }

    /// Location view, if applicable.
    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Entity::Location(l) => Some(l),
            _ => None,
        }
    }

    /// Object view, if applicable.
    pub fn as_object(&self) -> Option<&WorldObject> {
        match self {
            Entity::Object(o) => Some(o),
            _ => None,
        }
    }
}

// ============================================================================
// Names
// ============================================================================

/// Normalized sentient name record.
///
/// Deserializes from either a bare string or the structured form; always
/// serializes structured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawName")]
pub struct Name {
    pub first: String,
    pub display: String,
    pub known_to_player: bool,
}

impl Name {
    pub fn new(display: impl Into<String>) -> Self {
        let display = display.into();
        let first = display
            .split_whitespace()
            .next()
            .unwrap_or(display.as_str())
            .to_string();
        Self {
            first,
            display,
            known_to_player: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawName {
    Simple(String),
    Structured {
        #[serde(default)]
        first: String,
        #[serde(default)]
        display: String,
        #[serde(default = "default_true")]
        known_to_player: bool,
    },
}

fn default_true() -> bool {
    true
}

impl From<RawName> for Name {
    fn from(raw: RawName) -> Self {
        match raw {
            RawName::Simple(s) => Name::new(s),
            RawName::Structured {
                first,
                display,
                known_to_player,
            } => {
                let display = if display.is_empty() { first.clone() } else { display };
                let first = if first.is_empty() {
                    display
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string()
                } else {
                    first
                };
                Name {
                    first,
                    display,
                    known_to_player,
                }
            }
        }
    }
}

// ============================================================================
// Sentient entities
// ============================================================================

/// Field set shared by players, NPCs, and creatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentient {
    pub entity_id: EntityId,
    pub name: Name,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub state: SentientState,
    /// Inline cache of relationship edges; the ledger is canonical.
    #[serde(default, deserialize_with = "deserialize_relationships")]
    pub relationships: Vec<RelationshipSnapshot>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    /// Append-only short memory lines.
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub generated_depth: GeneratedDepth,
}

impl Sentient {
    /// Create a minimal sentient record at a location.
    pub fn skeleton(
        entity_id: impl Into<EntityId>,
        name: impl Into<String>,
        location_id: Option<EntityId>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: Name::new(name),
            appearance: Appearance::default(),
            state: SentientState {
                current_location_id: location_id,
                ..SentientState::default()
            },
            relationships: Vec::new(),
            goals: Vec::new(),
            memories: Vec::new(),
            generated_depth: GeneratedDepth::Minimal,
        }
    }

    /// Goals currently being pursued.
    pub fn active_goals(&self) -> impl Iterator<Item = &Goal> {
        self.goals.iter().filter(|g| g.status == GoalStatus::Active)
    }
}

/// Physical description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Appearance {
    #[serde(default)]
    pub visuals: String,
    #[serde(default)]
    pub impression: String,
}

/// Mutable sentient state.
///
/// `extra` retains oracle-authored keys that have no typed field, so
/// deltas that set novel state survive a round-trip through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentientState {
    #[serde(default)]
    pub current_location_id: Option<EntityId>,
    #[serde(default = "default_health")]
    pub health_status: String,
    #[serde(default = "default_emotion")]
    pub emotional_state: String,
    #[serde(default)]
    pub current_action: Option<CurrentAction>,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SentientState {
    fn default() -> Self {
        Self {
            current_location_id: None,
            health_status: default_health(),
            emotional_state: default_emotion(),
            current_action: None,
            inventory: Vec::new(),
            opportunities: Vec::new(),
            extra: Map::new(),
        }
    }
}

fn default_health() -> String {
    "healthy".to_string()
}

fn default_emotion() -> String {
    "stable".to_string()
}

/// What an NPC is visibly doing right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentAction {
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub target_id: Option<EntityId>,
}

/// How deeply an entity has been generated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedDepth {
    #[default]
    Minimal,
    Basic,
    Detailed,
    Full,
}

// ============================================================================
// Goals
// ============================================================================

/// An NPC goal, scheduled against the world clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Engine-recognized goal tag (e.g. `REVENGE`); free-form otherwise.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub target: Option<EntityId>,
    #[serde(default)]
    pub priority: GoalPriority,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default)]
    pub created_turn: u64,
    /// Clock minutes when the goal began; defaults to the current clock.
    #[serde(default)]
    pub started_at: Option<u64>,
    /// Estimated duration in minutes.
    #[serde(default)]
    pub duration_est: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Failed,
    Abandoned,
}

// ============================================================================
// Relationships (inline cache shape)
// ============================================================================

/// Inline relationship cache entry as carried on sentient records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSnapshot {
    pub entity_id: EntityId,
    #[serde(default)]
    pub trust: String,
    #[serde(default)]
    pub impression: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

/// Accept relationships as an array or as a stringified JSON array.
fn deserialize_relationships<'de, D>(deserializer: D) -> Result<Vec<RelationshipSnapshot>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRelationships {
        List(Vec<RelationshipSnapshot>),
        Encoded(String),
    }

    match RawRelationships::deserialize(deserializer)? {
        RawRelationships::List(list) => Ok(list),
        RawRelationships::Encoded(text) => {
            Ok(serde_json::from_str(&text).unwrap_or_default())
        }
    }
}

// ============================================================================
// Objects and locations
// ============================================================================

/// A non-sentient interactable object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldObject {
    pub entity_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: ObjectState,
}

impl WorldObject {
    pub fn new(
        entity_id: impl Into<EntityId>,
        name: impl Into<String>,
        location_id: Option<EntityId>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            description: String::new(),
            state: ObjectState {
                current_location_id: location_id,
                ..ObjectState::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectState {
    #[serde(default)]
    pub current_location_id: Option<EntityId>,
    #[serde(default)]
    pub container: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A place entities can occupy. Connections are undirected by
/// convention; both ends are maintained when locations are linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub entity_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub connected_location_ids: Vec<EntityId>,
}

impl Location {
    pub fn new(entity_id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            description: String::new(),
            connected_location_ids: Vec::new(),
        }
    }
}

// ============================================================================
// Opportunities
// ============================================================================

/// An ambient hook the player may react to but doesn't have to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub dramatic_weight: f64,
    #[serde(default)]
    pub sensory_details: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Clock minutes at creation.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub created_turn: u64,
    /// Expiry in clock minutes, if the record carries one.
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Expiry in turns, if the record carries one.
    #[serde(default)]
    pub expires_turn: Option<u64>,
    #[serde(default = "default_opportunity_status")]
    pub status: String,
}

fn default_opportunity_status() -> String {
    "active".to_string()
}

impl Opportunity {
    /// Whether this opportunity has lapsed at the given clock/turn.
    pub fn expired(&self, clock_minutes: u64, turn: u64) -> bool {
        if let Some(at) = self.expires_at {
            if clock_minutes >= at {
                return true;
            }
        }
        if let Some(t) = self.expires_turn {
            if turn >= t {
                return true;
            }
        }
        false
    }
}

/// Severity of an ambient event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalizes_from_string() {
        let name: Name = serde_json::from_value(serde_json::json!("Mira Vane")).unwrap();
        assert_eq!(name.first, "Mira");
        assert_eq!(name.display, "Mira Vane");
        assert!(name.known_to_player);
    }

    #[test]
    fn test_name_normalizes_from_record() {
        let name: Name = serde_json::from_value(serde_json::json!({
            "first": "Mira",
            "display": "Mira Vane",
            "known_to_player": false
        }))
        .unwrap();
        assert_eq!(name.first, "Mira");
        assert!(!name.known_to_player);
    }

    #[test]
    fn test_relationships_accept_stringified_json() {
        let raw = serde_json::json!({
            "entity_id": "npc_mira",
            "entity_type": "npc",
            "name": "Mira",
            "relationships": "[{\"entity_id\":\"player\",\"trust\":\"neutral\",\"impression\":\"curious\"}]"
        });
        let entity: Entity = serde_json::from_value(raw).unwrap();
        let sentient = entity.as_sentient().unwrap();
        assert_eq!(sentient.relationships.len(), 1);
        assert_eq!(sentient.relationships[0].trust, "neutral");
    }

    #[test]
    fn test_entity_tagged_roundtrip() {
        let loc = Entity::Location(Location::new("loc_bar", "The Bar"));
        let value = serde_json::to_value(&loc).unwrap();
        assert_eq!(value["entity_type"], "location");
        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back.id(), "loc_bar");
        assert_eq!(back.kind(), EntityKind::Location);
    }

    #[test]
    fn test_state_extra_keys_survive() {
        let raw = serde_json::json!({
            "entity_id": "obj_desk",
            "entity_type": "object",
            "name": "Desk",
            "state": { "current_location_id": "loc_office", "searchable": true }
        });
        let entity: Entity = serde_json::from_value(raw).unwrap();
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["state"]["searchable"], true);
    }

    #[test]
    fn test_opportunity_expiry() {
        let op = Opportunity {
            id: "opp_1".to_string(),
            kind: "social".to_string(),
            description: "Two patrons arguing".to_string(),
            dramatic_weight: 0.5,
            sensory_details: None,
            severity: None,
            created_at: 0,
            created_turn: 1,
            expires_at: Some(10),
            expires_turn: None,
            status: "active".to_string(),
        };
        assert!(!op.expired(9, 2));
        assert!(op.expired(10, 2));
    }
}
