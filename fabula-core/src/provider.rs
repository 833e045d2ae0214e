//! Content-oracle capability boundary.
//!
//! The oracle supplies outcomes, NPC behavior, and prose, and it is
//! untrusted: it may return invalid JSON, hallucinated entity
//! references, or ignore instructions entirely. Nothing it produces
//! escapes this boundary unchecked: every call site parses through the
//! helpers here and falls back to a local result on failure.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use oracle::{Error as OracleError, GenerateOptions, Generation, ResponseFormat, Role};

/// The capability the engine requires of a content oracle.
///
/// Implemented by the HTTP client in the `oracle` crate and by the
/// scripted mock in [`crate::testing`].
#[async_trait]
pub trait ContentOracle: Send + Sync {
    /// Generate text for a prompt under the given role and options.
    async fn generate(
        &self,
        prompt: &str,
        role: Role,
        options: GenerateOptions,
    ) -> Result<Generation, OracleError>;

    /// Total tokens consumed so far, for per-turn accounting.
    fn total_tokens(&self) -> u64 {
        0
    }
}

#[async_trait]
impl ContentOracle for oracle::Oracle {
    async fn generate(
        &self,
        prompt: &str,
        role: Role,
        options: GenerateOptions,
    ) -> Result<Generation, OracleError> {
        oracle::Oracle::generate(self, prompt, role, options).await
    }

    fn total_tokens(&self) -> u64 {
        oracle::Oracle::total_tokens(self)
    }
}

/// Strip markdown code fences the oracle wraps around JSON despite
/// instructions.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse an oracle JSON payload, tolerating code fences.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_code_fences(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_json_through_fences() {
        let value: Value = parse_json("```json\n{\"plausible\": true}\n```").unwrap();
        assert_eq!(value["plausible"], true);
    }
}
