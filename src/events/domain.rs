//! The seven domain event kinds (§6.2), each carrying a common envelope of
//! `event_id`, `session_id`, `petition_id`, `schema_version`, and
//! `created_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{AbortReason, Disposition, FailureReason, Phase};
use crate::domain::witness::PhaseWitnessEvent;
use crate::types::{ArchonId, EventId, PetitionId, SessionId};

/// Fields common to every emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub petition_id: PetitionId,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(session_id: SessionId, petition_id: PetitionId, schema_version: u32) -> Self {
        Self {
            event_id: EventId::new(),
            session_id,
            petition_id,
            schema_version,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWitnessed {
    pub envelope: EventEnvelope,
    pub witness: PhaseWitnessEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossExamineRoundTriggered {
    pub envelope: EventEnvelope,
    pub round_number: u32,
    pub previous_vote_distribution: BTreeMap<Disposition, u8>,
    pub participating_archons: Vec<ArchonId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockDetected {
    pub envelope: EventEnvelope,
    pub round_count: u32,
    pub votes_by_round: Vec<BTreeMap<Disposition, u8>>,
    pub final_vote_distribution: BTreeMap<Disposition, u8>,
    pub phase_at_deadlock: Phase,
    pub participating_archons: Vec<ArchonId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationTimeoutExpired {
    pub envelope: EventEnvelope,
    pub phase_at_timeout: Phase,
    pub started_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub configured_timeout_seconds: u64,
    pub participating_archons: [ArchonId; 3],
}

impl DeliberationTimeoutExpired {
    pub fn elapsed_seconds(&self) -> f64 {
        (self.timeout_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchonSubstituted {
    pub envelope: EventEnvelope,
    pub failed_archon_id: ArchonId,
    pub substitute_archon_id: ArchonId,
    pub phase_at_failure: Phase,
    pub failure_reason: FailureReason,
    pub substitution_latency_ms: u64,
    pub met_sla: bool,
    pub transcript_pages_provided: usize,
}

/// A single archon's attributed failure, recorded on a `DeliberationAborted`
/// event regardless of whether it was ever substituted out — unlike
/// `ArchonSubstitution`, this shape has no `substitute_archon_id` to fill in
/// for the failure that triggered the abort itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedArchonRecord {
    pub archon_id: ArchonId,
    pub failure_reason: FailureReason,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationAborted {
    pub envelope: EventEnvelope,
    pub reason: AbortReason,
    pub failed_archons: Vec<FailedArchonRecord>,
    pub phase_at_abort: Phase,
    pub surviving_archon_id: Option<ArchonId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationCompleted {
    pub envelope: EventEnvelope,
    pub outcome: Disposition,
    pub vote_distribution: BTreeMap<Disposition, u8>,
    pub dissent_archon_id: Option<ArchonId>,
}

/// The union of every event kind the engine can emit onto an
/// `ports::EventSink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    PhaseWitness(PhaseWitnessed),
    CrossExamineRoundTriggered(CrossExamineRoundTriggered),
    DeadlockDetected(DeadlockDetected),
    DeliberationTimeoutExpired(DeliberationTimeoutExpired),
    ArchonSubstituted(ArchonSubstituted),
    DeliberationAborted(DeliberationAborted),
    DeliberationCompleted(DeliberationCompleted),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_seconds_matches_the_configured_gap() {
        let now = Utc::now();
        let event = DeliberationTimeoutExpired {
            envelope: EventEnvelope::new(SessionId::new(), PetitionId::new(), 1),
            phase_at_timeout: Phase::Position,
            started_at: now,
            timeout_at: now + chrono::Duration::seconds(300),
            configured_timeout_seconds: 300,
            participating_archons: [ArchonId::new(), ArchonId::new(), ArchonId::new()],
        };
        assert!((event.elapsed_seconds() - 300.0).abs() < 0.001);
    }
}
