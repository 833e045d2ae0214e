//! Append-only event log.
//!
//! One record is emitted per observer present when narration occurs, so
//! "what did observer X see by turn T" and "what happened at location L"
//! are both answerable. Those two orderings are load-bearing for the
//! retroactive-causality check.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::EntityId;

/// Action type recorded for narration fan-out events.
pub const ACTION_NARRATION: &str = "NARRATION";
/// Action type recorded for fast-path movement.
pub const ACTION_MOVE: &str = "move";
/// Action type recorded for explicit look/observation.
pub const ACTION_LOOK: &str = "look";
/// Action type recorded for player notes.
pub const ACTION_NOTE: &str = "note";

/// An immutable event-log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub turn_number: u64,
    pub location_id: EntityId,
    pub observer_id: EntityId,
    pub action_type: String,
    pub event_data: Value,
    pub timestamp: String,
}

impl EventRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn new(
        turn_number: u64,
        location_id: impl Into<EntityId>,
        observer_id: impl Into<EntityId>,
        action_type: impl Into<String>,
        event_data: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            turn_number,
            location_id: location_id.into(),
            observer_id: observer_id.into(),
            action_type: action_type.into(),
            event_data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Query helpers over an ordered slice of records.
///
/// Records are appended in turn order, so slices returned here preserve
/// the `(_, turn_number)` orderings without re-sorting.
pub trait EventQuery {
    /// Everything `observer` saw up to and including `turn`.
    fn for_observer(&self, observer: &str, up_to_turn: u64) -> Vec<&EventRecord>;

    /// Everything that happened at `location`.
    fn at_location(&self, location: &str) -> Vec<&EventRecord>;

    /// The `limit` most recent look/move observation events for the given
    /// observer, newest first. This is the retroactive-causality window.
    fn recent_observations(&self, observer: &str, limit: usize) -> Vec<&EventRecord>;

    /// The `limit` most recent narration texts, oldest first.
    fn recent_narrations(&self, limit: usize) -> Vec<String>;
}

impl EventQuery for [EventRecord] {
    fn for_observer(&self, observer: &str, up_to_turn: u64) -> Vec<&EventRecord> {
        self.iter()
            .filter(|e| e.observer_id == observer && e.turn_number <= up_to_turn)
            .collect()
    }

    fn at_location(&self, location: &str) -> Vec<&EventRecord> {
        self.iter().filter(|e| e.location_id == location).collect()
    }

    fn recent_observations(&self, observer: &str, limit: usize) -> Vec<&EventRecord> {
        self.iter()
            .rev()
            .filter(|e| {
                e.action_type == ACTION_LOOK
                    || (e.action_type == ACTION_MOVE && e.observer_id == observer)
            })
            .take(limit)
            .collect()
    }

    fn recent_narrations(&self, limit: usize) -> Vec<String> {
        let mut texts: Vec<String> = self
            .iter()
            .rev()
            .filter(|e| e.action_type == ACTION_NARRATION)
            .filter_map(|e| {
                e.event_data
                    .get("narrative")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .take(limit)
            .collect();
        texts.reverse();
        texts
    }
}
