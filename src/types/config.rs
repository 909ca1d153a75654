//! Deliberation configuration.
//!
//! Only the two options that are genuinely meant to vary by deployment are
//! runtime fields; the rest (substitution cap, substitution SLA, context
//! package schema version) are domain constants fixed by the protocol and
//! exposed as accessor methods so callers reading configuration never need
//! a special case for "is this one configurable or not" (see DESIGN.md,
//! Open Question 1).

use serde::{Deserialize, Serialize};

/// Substitution count cap, per deliberation session.
pub const MAX_SUBSTITUTIONS: usize = 1;

/// Latency budget, in milliseconds, for a substitution to complete within SLA.
pub const MAX_SUBSTITUTION_LATENCY_MS: u64 = 10_000;

/// Schema version stamped onto every built context package.
pub const CONTEXT_SCHEMA_VERSION: &str = "1.1.0";

/// Required number of archons assigned to a deliberation session.
pub const REQUIRED_ARCHON_COUNT: usize = 3;

/// Votes required, out of three, for a disposition to reach consensus.
pub const CONSENSUS_THRESHOLD: u8 = 2;

/// Deliberation-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How long a deliberation may run before the timeout handler forces
    /// `ESCALATE`. Zero disables scheduling (used only in tests).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Ceiling on cross-examine/vote rounds before a 1-1-1 split is treated
    /// as an unrecoverable deadlock.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_max_rounds() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self::default_preset()
    }
}

impl Config {
    /// The standard deployment configuration: 5 minute timeout, 3 rounds.
    pub fn default_preset() -> Self {
        Self { timeout_seconds: 300, max_rounds: 3 }
    }

    /// A configuration that deadlocks immediately on any 1-1-1 split,
    /// useful for exercising the deadlock path without three full rounds.
    pub fn single_round_preset() -> Self {
        Self { timeout_seconds: 300, max_rounds: 1 }
    }

    pub fn timeout_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_seconds as i64)
    }

    pub fn max_substitutions(&self) -> usize {
        MAX_SUBSTITUTIONS
    }

    pub fn max_substitution_latency_ms(&self) -> u64 {
        MAX_SUBSTITUTION_LATENCY_MS
    }

    pub fn context_schema_version(&self) -> &'static str {
        CONTEXT_SCHEMA_VERSION
    }
}
