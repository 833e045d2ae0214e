//! Directed relationship ledger.
//!
//! Edges are stored directed under the `(from, to)` key. By convention,
//! the edge `(from = Y, to = X)` answers "how does X feel about Y": the
//! ripple propagator writes the edge `(from = actor, to = affected)` to
//! record the affected party's feelings toward the actor. This direction
//! must be preserved exactly; swapping it silently inverts every
//! relationship in the world.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::EntityId;

/// A directed relationship edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    #[serde(default = "default_neutral")]
    pub trust: String,
    /// Impression the `to` entity holds of the `from` entity.
    #[serde(default = "default_neutral")]
    pub status: String,
    /// Append-only, deduplicated.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Append-only ordered log of short lines.
    #[serde(default)]
    pub history: Vec<String>,
    /// Turn of the most recent mutation.
    #[serde(default)]
    pub last_interaction: u64,
}

fn default_neutral() -> String {
    "neutral".to_string()
}

/// A partial update applied to an edge by the ripple propagator.
#[derive(Debug, Clone, Default)]
pub struct RelationshipUpdate {
    pub trust: Option<String>,
    pub impression: Option<String>,
    pub add_tags: Vec<String>,
    pub add_history: Option<String>,
}

/// The set of relationship edges for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    edges: Vec<RelationshipEdge>,
}

impl Ledger {
    /// Look up the directed edge `(from, to)`.
    pub fn edge(&self, from: &str, to: &str) -> Option<&RelationshipEdge> {
        self.edges
            .iter()
            .find(|e| e.from_entity_id == from && e.to_entity_id == to)
    }

    /// How `subject` currently feels about `other`, per the read convention.
    pub fn feeling_of(&self, subject: &str, other: &str) -> Option<&RelationshipEdge> {
        self.edge(other, subject)
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    /// Upsert the `(from, to)` edge: scalar fields are coalesced with the
    /// existing values, tags are unioned, history is appended. Nothing is
    /// ever overwritten wholesale.
    pub fn upsert(&mut self, from: &str, to: &str, turn: u64, update: RelationshipUpdate) {
        let index = match self
            .edges
            .iter()
            .position(|e| e.from_entity_id == from && e.to_entity_id == to)
        {
            Some(index) => index,
            None => {
                self.edges.push(RelationshipEdge {
                    from_entity_id: from.to_string(),
                    to_entity_id: to.to_string(),
                    trust: default_neutral(),
                    status: default_neutral(),
                    tags: Vec::new(),
                    history: Vec::new(),
                    last_interaction: turn,
                });
                self.edges.len() - 1
            }
        };
        let edge = &mut self.edges[index];

        if let Some(trust) = update.trust {
            edge.trust = trust;
        }
        if let Some(impression) = update.impression {
            edge.status = impression;
        }
        for tag in update.add_tags {
            if !edge.tags.contains(&tag) {
                edge.tags.push(tag);
            }
        }
        if let Some(line) = update.add_history {
            edge.history.push(line);
        }
        edge.last_interaction = turn;

        debug!(from, to, trust = %edge.trust, "relationship edge updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_creates_then_mutates() {
        let mut ledger = Ledger::default();
        ledger.upsert(
            "player",
            "npc_mira",
            3,
            RelationshipUpdate {
                trust: Some("broken".to_string()),
                impression: Some("fearful".to_string()),
                add_tags: vec!["victim_of_violence".to_string()],
                add_history: Some("Turn 3: Player committed violence against me.".to_string()),
            },
        );

        let edge = ledger.edge("player", "npc_mira").unwrap();
        assert_eq!(edge.trust, "broken");
        assert_eq!(edge.status, "fearful");
        assert_eq!(edge.history.len(), 1);

        // Second update coalesces rather than replacing.
        ledger.upsert(
            "player",
            "npc_mira",
            4,
            RelationshipUpdate {
                add_tags: vec!["victim_of_violence".to_string(), "witnessed_violence".to_string()],
                add_history: Some("Turn 4: It happened again.".to_string()),
                ..RelationshipUpdate::default()
            },
        );

        let edge = ledger.edge("player", "npc_mira").unwrap();
        assert_eq!(edge.trust, "broken", "trust persists when update omits it");
        assert_eq!(edge.tags.len(), 2, "tags deduplicated");
        assert_eq!(edge.history.len(), 2);
        assert_eq!(edge.last_interaction, 4);
    }

    #[test]
    fn test_read_direction() {
        let mut ledger = Ledger::default();
        ledger.upsert(
            "player",
            "npc_mira",
            1,
            RelationshipUpdate {
                trust: Some("suspicious".to_string()),
                ..RelationshipUpdate::default()
            },
        );

        // Mira's feeling about the player reads the (player -> mira) edge.
        let edge = ledger.feeling_of("npc_mira", "player").unwrap();
        assert_eq!(edge.trust, "suspicious");
        assert!(ledger.feeling_of("player", "npc_mira").is_none());
    }
}
