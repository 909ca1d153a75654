//! Orchestrator (C7).
//!
//! Sequences the phase executor (C3) through ASSESS, POSITION, and a
//! CROSS_EXAMINE/VOTE loop, consulting the timeout handler (C4) around the
//! whole run and the deadlock (C5) / substitution (C6) handlers as each
//! phase's outcome requires. Grounded on
//! `deliberation_orchestrator_service.py`'s `orchestrate` /
//! `_execute_phase_with_substitution` / `_execute_cross_examine_vote_loop`,
//! and on the teacher's explicit-dependency-struct + `tracing::instrument`
//! construction style (`kernel/orchestrator.rs`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::context::ContextPackage;
use crate::domain::deadlock::{DeadlockHandler, DeadlockOutcome};
use crate::domain::phase_executor::{PhaseExecutionFailure, PhaseExecutor, PhaseResult};
use crate::domain::ports::{EventSink, SessionRepository, TranscriptWitnessStore};
use crate::domain::session::{AbortReason, Disposition, Phase, Session};
use crate::domain::substitution::SubstitutionHandler;
use crate::domain::timeout::TimeoutHandler;
use crate::domain::witness::PhaseWitnessEvent;
use crate::events::domain::{DeliberationCompleted, DomainEvent, EventEnvelope};
use crate::types::{ArchonId, Config, Error, PetitionId, Result, SessionId};

const DELIBERATION_EVENT_SCHEMA_VERSION: u32 = 1;

/// A single `execute_*` call, boxed so `run_phase` can treat ASSESS,
/// POSITION, CROSS_EXAMINE, and VOTE identically despite their differing
/// signatures (each takes a different predecessor `PhaseResult`). Callers
/// move owned clones of the executor handle and phase inputs into the
/// async block, so the future never borrows past its own call.
type PhaseCall = Pin<Box<dyn Future<Output = std::result::Result<PhaseResult, PhaseExecutionFailure>> + Send>>;

/// The final, assembled outcome of one orchestrated deliberation.
#[derive(Debug, Clone)]
pub struct DeliberationResult {
    pub session_id: SessionId,
    pub petition_id: PetitionId,
    pub outcome: Option<Disposition>,
    pub votes: HashMap<ArchonId, Disposition>,
    pub dissent_archon_id: Option<ArchonId>,
    pub phase_results: Vec<PhaseResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_aborted: bool,
    pub abort_reason: Option<AbortReason>,
}

enum PhaseAttemptOutcome {
    Completed { session: Session, result: PhaseResult },
    Aborted { session: Session },
}

/// Drives a single deliberation start-to-finish. Constructed with explicit
/// dependencies — never reaches for a global (SPEC_FULL.md §9).
///
/// Holds a `SessionRepository` handle (SPEC_FULL.md §9, "Global singletons":
/// the session repository is named there as a dependency of the orchestrator
/// constructor, not a process-wide singleton) so that every transition is
/// checkpointed through the same source of truth the timeout worker (C8)
/// races against — see `checkpoint` below and SPEC_FULL.md §5.
pub struct Orchestrator {
    executor: Arc<dyn PhaseExecutor>,
    timeout_handler: TimeoutHandler,
    deadlock_handler: Option<DeadlockHandler>,
    substitution_handler: Option<SubstitutionHandler>,
    witness_store: Arc<dyn TranscriptWitnessStore>,
    session_repository: Arc<dyn SessionRepository>,
    event_sink: Option<Arc<dyn EventSink>>,
    config: Config,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("config", &self.config).finish()
    }
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<dyn PhaseExecutor>,
        timeout_handler: TimeoutHandler,
        deadlock_handler: Option<DeadlockHandler>,
        substitution_handler: Option<SubstitutionHandler>,
        witness_store: Arc<dyn TranscriptWitnessStore>,
        session_repository: Arc<dyn SessionRepository>,
        event_sink: Option<Arc<dyn EventSink>>,
        config: Config,
    ) -> Self {
        Self {
            executor,
            timeout_handler,
            deadlock_handler,
            substitution_handler,
            witness_store,
            session_repository,
            event_sink,
            config,
        }
    }

    async fn emit(&self, event: DomainEvent) -> Result<()> {
        if let Some(sink) = &self.event_sink {
            sink.append(event).await?;
        }
        Ok(())
    }

    /// Persist `next` through the repository via compare-and-swap against
    /// `previous_version`, the version `next` was derived from. Refuses if
    /// the repository no longer holds exactly that version — the signature
    /// of a concurrent writer (the timeout worker, C8) having already won
    /// the race (SPEC_FULL.md §5, "Deadline firing"). A no-op transition
    /// (`next.version == previous_version`, e.g. a phase call that needed no
    /// substitution) is returned without touching the repository at all,
    /// since there is nothing new to persist and nothing to race over.
    async fn checkpoint(&self, previous_version: u64, next: Session) -> Result<Session> {
        if next.version == previous_version {
            return Ok(next);
        }
        let current = self.session_repository.get(next.session_id).await?;
        if current.version != previous_version {
            return Err(Error::session_already_complete(
                next.session_id,
                "session was advanced by a concurrent writer (e.g. a deliberation timeout) before this update could be persisted",
            ));
        }
        self.session_repository.save(next.clone()).await?;
        Ok(next)
    }

    /// Advance `session` to `phase`, checkpointing the transition.
    async fn advance(&self, session: Session, phase: Phase) -> Result<Session> {
        let previous_version = session.version;
        let advanced = session.advance_phase(phase)?;
        self.checkpoint(previous_version, advanced).await
    }

    /// Witness a completed phase result: append the transcript, attach its
    /// hash to `session` (the orchestrator's just-checkpointed working copy),
    /// and checkpoint the result. Appending to the witness store is itself an
    /// await point a concurrent `force_timeout` can race across, so the
    /// checkpoint's CAS against `session.version` still catches it.
    async fn witness_and_attach(&self, session: &Session, result: &PhaseResult) -> Result<Session> {
        let hash = self
            .witness_store
            .append(session.session_id, result.phase, &result.transcript, &result.participants, result.started_at, result.completed_at)
            .await?;
        let witnessed = session.record_transcript(result.phase, hash)?;
        let saved = self.checkpoint(session.version, witnessed).await?;
        let witness_event = PhaseWitnessEvent::new(
            session.session_id,
            result.phase,
            hash,
            result.started_at,
            result.completed_at,
            result.participants.clone(),
            result.phase_metadata.clone(),
        );
        self.emit(DomainEvent::PhaseWitness(crate::events::domain::PhaseWitnessed {
            envelope: EventEnvelope::new(saved.session_id, saved.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
            witness: witness_event,
        }))
        .await?;
        Ok(saved)
    }

    /// Run one phase to completion, retrying at most once via substitution
    /// if the failure is attributable to a single archon (SPEC_FULL.md §4.8,
    /// "Retry budget per phase"). The substitution cap (one per session)
    /// means a second archon-attributable failure always lands in the abort
    /// branch rather than retrying a third time.
    async fn run_phase(
        &self,
        mut session: Session,
        phase: Phase,
        call: impl Fn(Session) -> PhaseCall,
    ) -> Result<PhaseAttemptOutcome> {
        loop {
            match call(session.clone()).await {
                Ok(result) => return Ok(PhaseAttemptOutcome::Completed { session, result }),
                Err(failure) => {
                    let Some(archon_id) = failure.archon_id else {
                        return Err(Error::phase_execution_failure(phase, failure.reason, None));
                    };
                    let Some(handler) = &self.substitution_handler else {
                        return Err(Error::phase_execution_failure(phase, failure.reason, Some(archon_id)));
                    };
                    match handler.execute(&session, archon_id, &failure.reason, &self.config).await? {
                        Ok(substituted) => {
                            self.emit(DomainEvent::ArchonSubstituted(substituted.event)).await?;
                            session = substituted.session;
                            continue;
                        }
                        Err(aborted) => {
                            self.emit(DomainEvent::DeliberationAborted(aborted.event)).await?;
                            return Ok(PhaseAttemptOutcome::Aborted { session: aborted.session });
                        }
                    }
                }
            }
        }
    }

    fn build_aborted_result(
        &self,
        session: &Session,
        phase_results: Vec<PhaseResult>,
        started_at: DateTime<Utc>,
    ) -> DeliberationResult {
        DeliberationResult {
            session_id: session.session_id,
            petition_id: session.petition_id,
            outcome: session.outcome,
            votes: session.votes.clone(),
            dissent_archon_id: session.dissent_archon_id,
            phase_results,
            started_at,
            completed_at: session.completed_at,
            is_aborted: true,
            abort_reason: session.abort_reason,
        }
    }

    /// Run the full four-phase protocol for `session` against `package`.
    #[tracing::instrument(skip(self, session, package), fields(session_id = %session.session_id, petition_id = %session.petition_id))]
    pub async fn orchestrate(&self, session: Session, package: ContextPackage) -> Result<(Session, DeliberationResult)> {
        if package.petition_id != session.petition_id {
            return Err(Error::petition_session_mismatch(package.petition_id, session.petition_id));
        }

        self.session_repository.save(session.clone()).await?;

        let started_at = Utc::now();
        let schedule_base = session.version;
        let scheduled = self.timeout_handler.schedule(session).await?;
        let mut session = self.checkpoint(schedule_base, scheduled).await?;
        let mut phase_results: Vec<PhaseResult> = Vec::new();

        // ASSESS
        let executor = Arc::clone(&self.executor);
        let pkg = package.clone();
        let assess_base = session.version;
        let outcome = self
            .run_phase(session.clone(), Phase::Assess, move |s| {
                let executor = Arc::clone(&executor);
                let pkg = pkg.clone();
                Box::pin(async move { executor.execute_assess(&s, &pkg).await })
            })
            .await?;
        let assess_result = match outcome {
            PhaseAttemptOutcome::Aborted { session: s } => {
                let s = self.checkpoint(assess_base, s).await?;
                return Ok((s.clone(), self.build_aborted_result(&s, phase_results, started_at)));
            }
            PhaseAttemptOutcome::Completed { session: s, result } => {
                session = self.checkpoint(assess_base, s).await?;
                session = self.witness_and_attach(&session, &result).await?;
                session = self.advance(session, Phase::Position).await?;
                phase_results.push(result.clone());
                result
            }
        };

        // POSITION
        let executor = Arc::clone(&self.executor);
        let pkg = package.clone();
        let prior = assess_result.clone();
        let position_base = session.version;
        let outcome = self
            .run_phase(session.clone(), Phase::Position, move |s| {
                let executor = Arc::clone(&executor);
                let pkg = pkg.clone();
                let prior = prior.clone();
                Box::pin(async move { executor.execute_position(&s, &pkg, &prior).await })
            })
            .await?;
        let mut previous_result = match outcome {
            PhaseAttemptOutcome::Aborted { session: s } => {
                let s = self.checkpoint(position_base, s).await?;
                return Ok((s.clone(), self.build_aborted_result(&s, phase_results, started_at)));
            }
            PhaseAttemptOutcome::Completed { session: s, result } => {
                session = self.checkpoint(position_base, s).await?;
                session = self.witness_and_attach(&session, &result).await?;
                session = self.advance(session, Phase::CrossExamine).await?;
                phase_results.push(result.clone());
                result
            }
        };

        // CROSS_EXAMINE / VOTE loop
        loop {
            let executor = Arc::clone(&self.executor);
            let pkg = package.clone();
            let prior = previous_result.clone();
            let cross_examine_base = session.version;
            let outcome = self
                .run_phase(session.clone(), Phase::CrossExamine, move |s| {
                    let executor = Arc::clone(&executor);
                    let pkg = pkg.clone();
                    let prior = prior.clone();
                    Box::pin(async move { executor.execute_cross_examine(&s, &pkg, &prior).await })
                })
                .await?;
            let cross_examine_result = match outcome {
                PhaseAttemptOutcome::Aborted { session: s } => {
                    let s = self.checkpoint(cross_examine_base, s).await?;
                    return Ok((s.clone(), self.build_aborted_result(&s, phase_results, started_at)));
                }
                PhaseAttemptOutcome::Completed { session: s, result } => {
                    session = self.checkpoint(cross_examine_base, s).await?;
                    session = self.witness_and_attach(&session, &result).await?;
                    session = self.advance(session, Phase::Vote).await?;
                    phase_results.push(result.clone());
                    result
                }
            };

            let executor = Arc::clone(&self.executor);
            let pkg = package.clone();
            let prior = cross_examine_result.clone();
            let vote_base = session.version;
            let outcome = self
                .run_phase(session.clone(), Phase::Vote, move |s| {
                    let executor = Arc::clone(&executor);
                    let pkg = pkg.clone();
                    let prior = prior.clone();
                    Box::pin(async move { executor.execute_vote(&s, &pkg, &prior).await })
                })
                .await?;
            let vote_result = match outcome {
                PhaseAttemptOutcome::Aborted { session: s } => {
                    let s = self.checkpoint(vote_base, s).await?;
                    return Ok((s.clone(), self.build_aborted_result(&s, phase_results, started_at)));
                }
                PhaseAttemptOutcome::Completed { session: s, result } => {
                    session = self.checkpoint(vote_base, s).await?;
                    session = self.witness_and_attach(&session, &result).await?;
                    phase_results.push(result.clone());
                    result
                }
            };

            let votes = vote_result.votes()?;
            let votes_base = session.version;
            let recorded = session.record_votes(votes)?;
            session = self.checkpoint(votes_base, recorded).await?;

            let consensus_base = session.version;
            match session.resolve_consensus() {
                Ok(resolved) => {
                    session = self.checkpoint(consensus_base, resolved).await?;
                    break;
                }
                Err(err) if err.is_recoverable() => {
                    let Some(deadlock_handler) = &self.deadlock_handler else {
                        return Err(err);
                    };
                    let distribution = crate::domain::session::vote_distribution(&session.votes);
                    match deadlock_handler.handle_no_consensus(&session, distribution, &self.config)? {
                        DeadlockOutcome::RoundTriggered { session: s, event } => {
                            self.emit(DomainEvent::CrossExamineRoundTriggered(event)).await?;
                            session = self.checkpoint(consensus_base, s).await?;
                            previous_result = cross_examine_result;
                            continue;
                        }
                        DeadlockOutcome::Escalated { session: s, event } => {
                            self.emit(DomainEvent::DeadlockDetected(event)).await?;
                            session = self.checkpoint(consensus_base, s).await?;
                            break;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let cancel_base = session.version;
        let cancelled = self.timeout_handler.cancel(session).await?;
        session = self.checkpoint(cancel_base, cancelled).await?;

        let outcome = session.outcome;
        if let Some(disposition) = outcome {
            let distribution = crate::domain::session::vote_distribution(&session.votes);
            self.emit(DomainEvent::DeliberationCompleted(DeliberationCompleted {
                envelope: EventEnvelope::new(session.session_id, session.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
                outcome: disposition,
                vote_distribution: distribution,
                dissent_archon_id: session.dissent_archon_id,
            }))
            .await?;
        }

        let result = DeliberationResult {
            session_id: session.session_id,
            petition_id: session.petition_id,
            outcome,
            votes: session.votes.clone(),
            dissent_archon_id: session.dissent_archon_id,
            phase_results,
            started_at,
            completed_at: session.completed_at,
            is_aborted: session.is_aborted,
            abort_reason: session.abort_reason,
        };

        Ok((session, result))
    }
}
