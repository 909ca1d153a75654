//! Application error types.
//!
//! All errors use `thiserror` for automatic `Error` trait derivation and
//! provide clear, structured messages. Variants map one-to-one onto the
//! failure kinds a deliberation session can encounter; the orchestrator
//! decides which are recoverable (see `domain::orchestrator`).

use crate::domain::session::Phase;
use crate::types::{ArchonId, JobId, PetitionId, SessionId};
use thiserror::Error;

/// Deliberation engine result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum for the deliberation engine.
#[derive(Error, Debug)]
pub enum Error {
    /// An illegal phase move was attempted (programming error).
    #[error("invalid phase transition: {from:?} -> {to:?} (expected {expected:?})")]
    InvalidPhaseTransition {
        from: Phase,
        to: Phase,
        expected: Phase,
    },

    /// Three votes were recorded but no disposition reached a 2-of-3 majority.
    #[error("consensus not reached: {votes_received} of {votes_required} required votes agree")]
    ConsensusNotReached {
        votes_received: u8,
        votes_required: u8,
    },

    /// A transition was attempted on a session already in `Phase::Complete`.
    #[error("session {session_id} is already complete: {message}")]
    SessionAlreadyComplete { session_id: SessionId, message: String },

    /// The session repository has no record of the referenced session.
    #[error("session {session_id} not found: {message}")]
    SessionNotFound { session_id: SessionId, message: String },

    /// The assigned archon panel did not have exactly three distinct members.
    #[error("invalid archon assignment: expected 3 distinct archons, got {archon_count}")]
    InvalidArchonAssignment { archon_count: usize },

    /// A context package's `petition_id` does not match its session's.
    #[error("petition/session mismatch: petition {petition_id} vs session's {session_petition_id}")]
    PetitionSessionMismatch {
        petition_id: PetitionId,
        session_petition_id: PetitionId,
    },

    /// The phase executor port failed to produce a result.
    #[error("phase execution failed in {phase:?}: {reason}{}", archon_id.map(|a| format!(" (archon {a})")).unwrap_or_default())]
    PhaseExecutionFailure {
        phase: Phase,
        reason: String,
        archon_id: Option<ArchonId>,
    },

    /// A deliberation result was requested before the session reached `Complete`.
    #[error("deliberation for petition {petition_id} is still pending")]
    DeliberationPending { petition_id: PetitionId },

    /// The archon pool has no unused candidate left for substitution.
    #[error("archon pool exhausted: {available_count} available, {required_count} required")]
    ArchonPoolExhausted {
        available_count: usize,
        required_count: usize,
    },

    /// A scheduled job was referenced that the job scheduler does not know about.
    #[error("job {job_id} not found")]
    JobNotFound { job_id: JobId },

    /// A due job's payload was missing or malformed (e.g. no parseable
    /// `session_id`) — distinct from a transient job-queue failure so the
    /// worker can tell "this job will never succeed" from "retry later".
    #[error("invalid job payload: {message}")]
    InvalidJobPayload { message: String },

    /// Serialization/deserialization errors (context packages, events, snapshots).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors that do not fit a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_phase_transition(from: Phase, to: Phase, expected: Phase) -> Self {
        Self::InvalidPhaseTransition { from, to, expected }
    }

    pub fn consensus_not_reached(votes_received: u8, votes_required: u8) -> Self {
        Self::ConsensusNotReached { votes_received, votes_required }
    }

    pub fn session_already_complete(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::SessionAlreadyComplete { session_id, message: message.into() }
    }

    pub fn session_not_found(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::SessionNotFound { session_id, message: message.into() }
    }

    pub fn invalid_archon_assignment(archon_count: usize) -> Self {
        Self::InvalidArchonAssignment { archon_count }
    }

    pub fn petition_session_mismatch(petition_id: PetitionId, session_petition_id: PetitionId) -> Self {
        Self::PetitionSessionMismatch { petition_id, session_petition_id }
    }

    pub fn phase_execution_failure(phase: Phase, reason: impl Into<String>, archon_id: Option<ArchonId>) -> Self {
        Self::PhaseExecutionFailure { phase, reason: reason.into(), archon_id }
    }

    pub fn deliberation_pending(petition_id: PetitionId) -> Self {
        Self::DeliberationPending { petition_id }
    }

    pub fn archon_pool_exhausted(available_count: usize, required_count: usize) -> Self {
        Self::ArchonPoolExhausted { available_count, required_count }
    }

    pub fn job_not_found(job_id: JobId) -> Self {
        Self::JobNotFound { job_id }
    }

    pub fn invalid_job_payload(message: impl Into<String>) -> Self {
        Self::InvalidJobPayload { message: message.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors the orchestrator is expected to consume internally
    /// rather than propagate (see `domain::orchestrator`).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConsensusNotReached { .. } | Error::PhaseExecutionFailure { archon_id: Some(_), .. }
        )
    }
}
