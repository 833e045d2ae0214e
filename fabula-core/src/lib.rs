//! Turn-resolution engine for oracle-driven interactive fiction.
//!
//! This crate is the consistency core of a simulation whose semantic
//! decisions (action outcomes, NPC behavior, prose) all come from an
//! external generative-text oracle that is untrusted by design. It
//! provides:
//! - A turn pipeline with a deterministic movement fast path and
//!   probabilistic outcome resolution for everything else
//! - Sanitization and validation of every oracle-authored state change
//!   before it can touch the world
//! - A relationship ledger with ripple-effect propagation
//! - A goal-driven world clock that can interrupt turns
//! - Whole-store snapshots with turn-keyed undo
//!
//! # Quick Start
//!
//! ```ignore
//! use fabula_core::{GameSession, SessionConfig};
//! use oracle::Oracle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = Oracle::from_env()?;
//!     let mut session = GameSession::open(oracle, SessionConfig::new("data"))?;
//!
//!     let output = session.player_action("look around the bar").await?;
//!     println!("{}", output.narrative);
//!
//!     session.undo()?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod entity;
pub mod events;
pub mod ledger;
pub mod provider;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod testing;

// Primary public API
pub use engine::{EngineError, TurnEngine, TurnOutput};
pub use entity::{Entity, EntityId, EntityKind};
pub use provider::ContentOracle;
pub use session::{GameSession, SessionConfig, SessionError, SessionState};
pub use snapshot::SnapshotManager;
pub use store::{StoreError, WorldStore};
pub use testing::{ScriptedOracle, TestHarness};
