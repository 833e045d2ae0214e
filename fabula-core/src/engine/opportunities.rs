//! Ambient opportunity generation.
//!
//! Opportunities are purely optional hooks the player could react to.
//! They are capped at five concurrently active, deduplicated by
//! case-insensitive substring containment against existing descriptions,
//! and expire by clock minutes or turn count, whichever the record
//! carries.

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::entity::{generate_id, Opportunity, Severity};
use crate::provider::{parse_json, ContentOracle, GenerateOptions, Role};

/// Maximum concurrently active opportunities.
pub const MAX_ACTIVE: usize = 5;

/// Default opportunity lifetime when the oracle supplies none.
const DEFAULT_EXPIRATION_MINUTES: u64 = 15;
/// Default ambient-event lifetime.
const DEFAULT_AMBIENT_MINUTES: u64 = 5;
/// Rough turns-per-hour conversion used for turn-count expiry.
const MINUTES_PER_TURN: u64 = 4;

#[derive(Deserialize)]
struct RawOpportunity {
    #[serde(default)]
    #[serde(rename = "type")]
    kind: String,
    description: String,
    #[serde(default)]
    dramatic_weight: f64,
    #[serde(default)]
    expiration_minutes: Option<u64>,
    #[serde(default)]
    sensory_details: Option<String>,
    #[serde(default)]
    severity: Option<Severity>,
}

/// Context for opportunity generation.
pub struct OpportunityContext<'a> {
    pub location_name: &'a str,
    pub location_desc: &'a str,
    pub recent_narrative: &'a str,
    pub clock_minutes: u64,
    pub turn: u64,
}

/// Drop expired entries in place.
pub fn expire(opportunities: &mut Vec<Opportunity>, clock_minutes: u64, turn: u64) {
    opportunities.retain(|op| {
        let expired = op.expired(clock_minutes, turn);
        if expired {
            info!(description = %op.description, turn, "opportunity expired");
        }
        !expired
    });
}

/// Generate up to the remaining slots' worth of new opportunities.
///
/// Returns an empty list when the cap is already reached or when the
/// oracle produces nothing usable.
pub async fn generate<O: ContentOracle>(
    oracle: &O,
    context: &OpportunityContext<'_>,
    active: &[Opportunity],
) -> Vec<Opportunity> {
    if active.len() >= MAX_ACTIVE {
        return Vec::new();
    }

    let existing = active
        .iter()
        .map(|o| format!("- {}", o.description))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You are the opportunity generator for an interactive fiction engine.\n\
         Generate purely optional hooks the player COULD react to but doesn't have to.\n\n\
         LOCATION: {location} - {desc}\n\
         RECENT NARRATIVE: \"{recent}\"\n\
         ACTIVE OPPORTUNITIES (do not repeat):\n{existing}\n\n\
         Generate 0-2 opportunities. Prefer zero over generic ones; each must be\n\
         plot-relevant and actionable.\n\n\
         Respond with a JSON array:\n\
         [{{\"type\": string, \"description\": string, \"dramatic_weight\": number,\n\
           \"expiration_minutes\": number}}]",
        location = context.location_name,
        desc = context.location_desc,
        recent = context.recent_narrative,
        existing = if existing.is_empty() { "None" } else { &existing },
    );

    let raw = match oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default().json())
        .await
    {
        Ok(generated) => generated.text,
        Err(e) => {
            error!(error = %e, "opportunity generation failed");
            return Vec::new();
        }
    };

    let candidates: Vec<RawOpportunity> = match parse_json::<Value>(&raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        _ => {
            error!("opportunity response was not a JSON array");
            return Vec::new();
        }
    };

    // Code-side dedup against active descriptions, containment either way.
    let unique: Vec<RawOpportunity> = candidates
        .into_iter()
        .filter(|candidate| {
            let lower = candidate.description.to_lowercase();
            !active.iter().any(|existing| {
                let existing_lower = existing.description.to_lowercase();
                existing_lower.contains(&lower) || lower.contains(&existing_lower)
            })
        })
        .collect();

    let slots = MAX_ACTIVE - active.len();
    unique
        .into_iter()
        .take(slots)
        .map(|raw| stamp(raw, "opp", context.clock_minutes, context.turn, DEFAULT_EXPIRATION_MINUTES))
        .collect()
}

/// Generate a single ambient event of the given severity.
pub async fn generate_ambient<O: ContentOracle>(
    oracle: &O,
    location_name: &str,
    clock_minutes: u64,
    turn: u64,
    severity: Severity,
) -> Option<Opportunity> {
    let prompt = format!(
        "Generate one ambient event for an interactive fiction scene.\n\
         LOCATION: {location}\n\
         SEVERITY: {severity:?} (MINOR = background detail, MODERATE = momentary\n\
         disruption, MAJOR = demands attention)\n\n\
         Respond with JSON: {{\"type\": \"ambient\", \"description\": string,\n\
         \"sensory_details\": string, \"dramatic_weight\": number,\n\
         \"expiration_minutes\": number}}",
        location = location_name,
        severity = severity,
    );

    let generated = oracle
        .generate(&prompt, Role::Creative, GenerateOptions::default().json())
        .await
        .map_err(|e| error!(error = %e, "ambient generation failed"))
        .ok()?;

    let mut raw: RawOpportunity = parse_json(&generated.text)
        .map_err(|e| error!(error = %e, "ambient response unparseable"))
        .ok()?;
    raw.severity = Some(severity);
    if raw.expiration_minutes.is_none() {
        raw.expiration_minutes = Some(DEFAULT_AMBIENT_MINUTES);
    }

    Some(stamp(raw, "amb", clock_minutes, turn, DEFAULT_AMBIENT_MINUTES))
}

fn stamp(
    raw: RawOpportunity,
    prefix: &str,
    clock_minutes: u64,
    turn: u64,
    default_minutes: u64,
) -> Opportunity {
    let minutes = raw.expiration_minutes.unwrap_or(default_minutes);
    Opportunity {
        id: generate_id(prefix),
        kind: raw.kind,
        description: raw.description,
        dramatic_weight: raw.dramatic_weight,
        sensory_details: raw.sensory_details,
        severity: raw.severity,
        created_at: clock_minutes,
        created_turn: turn,
        expires_at: Some(clock_minutes + minutes),
        expires_turn: Some(turn + minutes.div_ceil(MINUTES_PER_TURN)),
        status: "active".to_string(),
    }
}
