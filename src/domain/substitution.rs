//! Substitution Handler (C6).
//!
//! Grounded on `archon_substitution_service.py`: detects a phase-execution
//! failure attributable to a single archon, selects a replacement from the
//! pool, hands off prior transcripts, and records the substitution — or, if
//! substitution is impossible, aborts the deliberation to ESCALATE.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::domain::ports::ArchonPool;
use crate::domain::session::{AbortReason, FailureReason, Phase, Session};
use crate::events::domain::{ArchonSubstituted, DeliberationAborted, EventEnvelope, FailedArchonRecord};
use crate::types::config::MAX_SUBSTITUTION_LATENCY_MS;
use crate::types::{ArchonId, Config, Error, Result};

const DELIBERATION_EVENT_SCHEMA_VERSION: u32 = 1;

/// The prior-transcript bundle handed to the phase executor's retry attempt
/// so the substitute archon can catch up.
#[derive(Debug, Clone)]
pub struct ContextHandoff {
    pub session_id: crate::types::SessionId,
    pub petition_id: crate::types::PetitionId,
    pub current_phase: Phase,
    pub transcript_pages: Vec<(Phase, [u8; 32])>,
    pub previous_votes: BTreeMap<ArchonId, String>,
    pub round_count: u32,
}

/// The result of a successful substitution.
#[derive(Debug)]
pub struct SubstitutionResult {
    pub session: Session,
    pub event: ArchonSubstituted,
    pub substitute_archon_id: ArchonId,
    pub latency_ms: u64,
    pub met_sla: bool,
}

/// The result of an abort (substitution was impossible).
#[derive(Debug)]
pub struct AbortResult {
    pub session: Session,
    pub event: DeliberationAborted,
}

pub struct SubstitutionHandler {
    archon_pool: Arc<dyn ArchonPool>,
}

impl std::fmt::Debug for SubstitutionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubstitutionHandler").finish()
    }
}

impl SubstitutionHandler {
    pub fn new(archon_pool: Arc<dyn ArchonPool>) -> Self {
        Self { archon_pool }
    }

    /// True iff the session is non-terminal, the named archon is currently
    /// active, and the failure reason is one of the three recognized kinds
    /// (always true here since `FailureReason` is already closed).
    pub fn detect(session: &Session, archon_id: ArchonId) -> bool {
        !session.phase.is_terminal() && session.is_archon_assigned(archon_id)
    }

    /// Scan the pool for the first candidate not already active on this
    /// session and not previously substituted out of it.
    async fn select(&self, session: &Session, failed_id: ArchonId) -> Result<Option<ArchonId>> {
        let active = session.current_active_archons();
        let prior_failed: Vec<ArchonId> = session.substitutions.iter().map(|s| s.failed_archon_id).collect();
        let candidates = self.archon_pool.list_all().await?;
        Ok(candidates
            .into_iter()
            .map(|descriptor| descriptor.archon_id)
            .find(|candidate| *candidate != failed_id && !active.contains(candidate) && !prior_failed.contains(candidate)))
    }

    fn prepare_handoff(&self, session: &Session) -> ContextHandoff {
        let mut transcript_pages: Vec<(Phase, [u8; 32])> =
            session.phase_transcripts.iter().map(|(phase, hash)| (*phase, *hash)).collect();
        transcript_pages.sort_by_key(|(phase, _)| *phase);

        let previous_votes = session
            .votes
            .iter()
            .map(|(archon_id, disposition)| (*archon_id, format!("{disposition:?}")))
            .collect();

        ContextHandoff {
            session_id: session.session_id,
            petition_id: session.petition_id,
            current_phase: session.phase,
            transcript_pages,
            previous_votes,
            round_count: session.round_count,
        }
    }

    /// The composite substitution attempt: validate, select a substitute,
    /// apply it to the session, and report the latency against the SLA.
    /// Returns `Err` only for genuine invariant violations (`detect` fails);
    /// an exhausted pool or a cap already at its limit are reported through
    /// `abort`, not propagated as an error, since they are expected,
    /// auditable outcomes.
    pub async fn execute(
        &self,
        session: &Session,
        failed_archon_id: ArchonId,
        reason: &str,
        config: &Config,
    ) -> Result<std::result::Result<SubstitutionResult, AbortResult>> {
        let start = Instant::now();

        if !Self::detect(session, failed_archon_id) {
            return Err(Error::invalid_archon_assignment(0));
        }

        if session.substitutions.len() >= config.max_substitutions() {
            return Ok(Err(self.abort(session, AbortReason::InsufficientArchons, failed_archon_id, reason)?));
        }

        let Some(substitute_archon_id) = self.select(session, failed_archon_id).await? else {
            return Ok(Err(self.abort(session, AbortReason::ArchonPoolExhausted, failed_archon_id, reason)?));
        };

        let failure_reason = classify_failure_reason(reason);
        let phase_at_failure = session.phase;
        let handoff = self.prepare_handoff(session);
        let updated = session.apply_substitution(failed_archon_id, substitute_archon_id, phase_at_failure, failure_reason)?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let met_sla = latency_ms <= MAX_SUBSTITUTION_LATENCY_MS;
        let event = ArchonSubstituted {
            envelope: EventEnvelope::new(session.session_id, session.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
            failed_archon_id,
            substitute_archon_id,
            phase_at_failure,
            failure_reason,
            substitution_latency_ms: latency_ms,
            met_sla,
            transcript_pages_provided: handoff.transcript_pages.len(),
        };

        Ok(Ok(SubstitutionResult { session: updated, event, substitute_archon_id, latency_ms, met_sla }))
    }

    /// Build the abort event's `failed_archons` list as every prior
    /// substitution's failed archon, plus the archon whose failure triggered
    /// this very abort — the latter never made it into `session.substitutions`
    /// since no substitute was ever applied for it (`archon_substitution_service.py`'s
    /// `_build_failed_archon_list`).
    fn abort(&self, session: &Session, reason: AbortReason, failed_archon_id: ArchonId, failure_reason: &str) -> Result<AbortResult> {
        let phase_at_abort = session.phase;
        let active = session.current_active_archons();
        let surviving_archon_id = active.into_iter().find(|id| *id != failed_archon_id);

        let mut failed_archons: Vec<FailedArchonRecord> = session
            .substitutions
            .iter()
            .map(|sub| FailedArchonRecord {
                archon_id: sub.failed_archon_id,
                failure_reason: sub.failure_reason,
                phase: sub.phase_at_failure,
            })
            .collect();
        failed_archons.push(FailedArchonRecord {
            archon_id: failed_archon_id,
            failure_reason: classify_failure_reason(failure_reason),
            phase: phase_at_abort,
        });

        let updated = session.force_abort(reason)?;
        let event = DeliberationAborted {
            envelope: EventEnvelope::new(session.session_id, session.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
            reason,
            failed_archons,
            phase_at_abort,
            surviving_archon_id,
        };
        Ok(AbortResult { session: updated, event })
    }
}

fn classify_failure_reason(reason: &str) -> FailureReason {
    let lowercase = reason.to_lowercase();
    if lowercase.contains("timeout") || lowercase.contains("timed out") {
        FailureReason::ResponseTimeout
    } else if lowercase.contains("invalid") || lowercase.contains("parse") {
        FailureReason::InvalidResponse
    } else {
        FailureReason::ApiError
    }
}
