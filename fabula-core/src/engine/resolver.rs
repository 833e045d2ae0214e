//! Weighted outcome-spectrum selection.
//!
//! The oracle proposes a spectrum of candidate outcomes with probability
//! weights; exactly one is selected per uncertain action. Malformed
//! candidates are dropped before weighting; if that empties the
//! spectrum, the caller substitutes a canned failure instead of calling
//! the selector.

use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::outcome::{NpcTrigger, Outcome};

/// Curation pass-through: the spectrum arrives already curated from the
/// cognition stage; kept as a seam for future filtering.
pub fn curate(candidates: Vec<Outcome>) -> Vec<Outcome> {
    info!(count = candidates.len(), "received outcome spectrum");
    candidates
}

/// Convert raw candidate values to outcomes, dropping malformed entries
/// (missing `outcome_type`, non-numeric `probability`).
pub fn parse_candidates(raw: &[Value]) -> Vec<Outcome> {
    let mut candidates = Vec::with_capacity(raw.len());
    for value in raw {
        let outcome_type = value.get("outcome_type").and_then(Value::as_str);
        let probability = value.get("probability").and_then(Value::as_f64);

        let (Some(outcome_type), Some(probability)) = (outcome_type, probability) else {
            warn!(candidate = %value, "dropping malformed spectrum candidate");
            continue;
        };

        let npc_triggers: Vec<NpcTrigger> = value
            .get("npc_triggers")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let tags: Vec<String> = value
            .get("tags")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        candidates.push(Outcome {
            outcome_type: outcome_type.to_string(),
            summary: value
                .get("narrative_summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            probability_weight: probability.max(0.0),
            immediate_effects: Vec::new(),
            world_state_changes: value.get("world_changes").cloned().unwrap_or(Value::Null),
            duration_minutes: value.get("duration_minutes").and_then(Value::as_u64),
            tags,
            npc_triggers,
            affected_entities: Vec::new(),
            npc_actions: Vec::new(),
        });
    }
    candidates
}

/// Select one outcome by weighted random draw.
///
/// Draws `r` uniformly in `[0, total_weight)` and walks the cumulative
/// sum. Zero-weight candidates are never selected unless every weight is
/// zero, in which case a uniform pick is made. Rounding that walks off
/// the end falls back to the last candidate; this never panics. Returns
/// `None` only for an empty slice.
pub fn select_weighted<'a, R: Rng>(rng: &mut R, candidates: &'a [Outcome]) -> Option<&'a Outcome> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates
        .iter()
        .map(|c| c.probability_weight.max(0.0))
        .sum();

    if total <= 0.0 {
        return Some(&candidates[rng.gen_range(0..candidates.len())]);
    }

    let roll = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for candidate in candidates {
        cumulative += candidate.probability_weight.max(0.0);
        if roll < cumulative {
            return Some(candidate);
        }
    }
    candidates.last()
}
