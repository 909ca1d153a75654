//! Phase Executor port (C3).
//!
//! The boundary between the deliberation engine and whatever actually
//! drives the three archons (an agent-invocation backend, in production).
//! The orchestrator never inspects how a `PhaseResult` was produced — only
//! that it was, or that a `PhaseExecutionFailure` was raised instead.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::ContextPackage;
use crate::domain::session::{Disposition, FailureReason, Phase, Session};
use crate::types::{ArchonId, Result};

/// A phase-execution failure attributable, when `archon_id` is set, to a
/// single agent — the shape the substitution handler (C6) consumes.
#[derive(Debug, Clone)]
pub struct PhaseExecutionFailure {
    pub phase: Phase,
    pub reason: String,
    pub archon_id: Option<ArchonId>,
}

impl PhaseExecutionFailure {
    pub fn new(phase: Phase, reason: impl Into<String>, archon_id: Option<ArchonId>) -> Self {
        Self { phase, reason: reason.into(), archon_id }
    }

    /// Classify the free-form `reason` string into one of the three
    /// substitution-relevant buckets. Unmatched reasons default to
    /// `ApiError`, the catch-all bucket in the original classification.
    pub fn classify(&self) -> FailureReason {
        let lowercase = self.reason.to_lowercase();
        if lowercase.contains("timeout") || lowercase.contains("timed out") {
            FailureReason::ResponseTimeout
        } else if lowercase.contains("invalid") || lowercase.contains("parse") {
            FailureReason::InvalidResponse
        } else {
            FailureReason::ApiError
        }
    }
}

impl std::fmt::Display for PhaseExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed: {}", self.phase, self.reason)?;
        if let Some(archon_id) = self.archon_id {
            write!(f, " (archon {archon_id})")?;
        }
        Ok(())
    }
}

impl std::error::Error for PhaseExecutionFailure {}

/// The outcome of a single phase execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub transcript: String,
    pub participants: Vec<ArchonId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// For `Phase::Vote`: the cast votes. For `Phase::CrossExamine`:
    /// `rounds_completed` / `challenges_raised` counters. Free-form
    /// otherwise.
    pub phase_metadata: serde_json::Value,
}

impl PhaseResult {
    /// Extract the vote map a completed VOTE phase must carry in its
    /// metadata.
    pub fn votes(&self) -> Result<HashMap<ArchonId, Disposition>> {
        let votes = self
            .phase_metadata
            .get("votes")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(votes)?)
    }
}

/// Port for executing a single deliberation phase. Implementations decide
/// their own concurrency within a phase (ASSESS and VOTE are described as
/// parallel agent fan-out, POSITION sequential, CROSS_EXAMINE a short
/// multi-round loop) — the orchestrator treats every call as one suspension
/// point (SPEC_FULL.md §5).
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute_assess(
        &self,
        session: &Session,
        package: &ContextPackage,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure>;

    async fn execute_position(
        &self,
        session: &Session,
        package: &ContextPackage,
        assess: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure>;

    async fn execute_cross_examine(
        &self,
        session: &Session,
        package: &ContextPackage,
        previous: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure>;

    async fn execute_vote(
        &self,
        session: &Session,
        package: &ContextPackage,
        cross_examine: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_timeout_phrasing() {
        let failure = PhaseExecutionFailure::new(Phase::Assess, "response timed out after 30s", None);
        assert_eq!(failure.classify(), FailureReason::ResponseTimeout);
    }

    #[test]
    fn classify_recognizes_invalid_response() {
        let failure = PhaseExecutionFailure::new(Phase::Position, "failed to parse invalid JSON body", None);
        assert_eq!(failure.classify(), FailureReason::InvalidResponse);
    }

    #[test]
    fn classify_defaults_to_api_error() {
        let failure = PhaseExecutionFailure::new(Phase::Vote, "upstream returned 503", None);
        assert_eq!(failure.classify(), FailureReason::ApiError);
    }
}
