//! Core types shared across the deliberation engine.
//!
//! - **IDs**: Strongly-typed identifiers (SessionId, PetitionId, ArchonId, ...).
//! - **Errors**: The crate's `thiserror`-derived error enum.
//! - **Config**: `DeliberationConfig` and its two sanctioned presets.

pub mod config;
mod errors;
mod ids;

pub use config::Config;
pub use errors::{Error, Result};
pub use ids::{ArchonId, EventId, JobId, PetitionId, SessionId};
