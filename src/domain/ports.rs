//! Port traits for every external collaborator the deliberation engine
//! depends on. All are injected explicitly into the collaborators that need
//! them (the orchestrator, the handlers) — there are no process-wide
//! singletons (SPEC_FULL.md §9, "Global singletons").

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::session::{Phase, Session};
use crate::events::DomainEvent;
use crate::types::{ArchonId, JobId, PetitionId, Result, SessionId};

/// Optimistic-concurrency storage for sessions. Implementations must
/// compare-and-swap on `Session::version` so the timeout worker and the
/// orchestrator can race safely (SPEC_FULL.md §5).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, session_id: SessionId) -> Result<Session>;
    async fn save(&self, session: Session) -> Result<()>;
}

/// The disposition-to-state mapping target a petition repository applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)] // Deferred/NoResponse are retained for parity with the wider lifecycle (SPEC_FULL §6.1); never produced by this engine.
pub enum PetitionState {
    Deliberating,
    Acknowledged,
    Referred,
    Escalated,
    Deferred,
    NoResponse,
}

/// Petition storage, consumed only through its compare-and-swap state
/// transition (SPEC_FULL.md §9, Open Question 2 — no plain-update fallback).
#[async_trait]
pub trait PetitionRepository: Send + Sync {
    /// `escalation_source` and `escalated_to_realm` are only ever populated
    /// when `new_state = PetitionState::Escalated` — they carry the forcing
    /// flag that drove the ESCALATE (`timed_out`/`is_deadlocked`/`is_aborted`)
    /// and the realm the escalation is routed to, per SPEC_FULL.md §6.1.
    /// Any other `new_state` passes `None` for both.
    async fn assign_fate_cas(
        &self,
        petition_id: PetitionId,
        expected_state: PetitionState,
        new_state: PetitionState,
        escalation_source: Option<&str>,
        escalated_to_realm: Option<&str>,
    ) -> Result<()>;
}

/// Durable job scheduling for the deliberation timeout deadline.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Result<JobId>;

    async fn cancel(&self, job_id: JobId) -> Result<()>;
}

/// A candidate substitute archon, as returned by the archon pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchonDescriptor {
    pub archon_id: ArchonId,
}

/// The pool of archons available for substitution.
#[async_trait]
pub trait ArchonPool: Send + Sync {
    async fn list_all(&self) -> Result<Vec<ArchonDescriptor>>;
}

/// Append-only receiver for domain events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: DomainEvent) -> Result<()>;
}

/// Content-addressed store for phase transcripts (§4.7).
#[async_trait]
pub trait TranscriptWitnessStore: Send + Sync {
    /// Store `transcript` and return its 32-byte BLAKE3 hash, which the
    /// caller then attaches to the session via `Session::record_transcript`.
    async fn append(
        &self,
        session_id: SessionId,
        phase: Phase,
        transcript: &str,
        participants: &[ArchonId],
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<[u8; 32]>;
}
