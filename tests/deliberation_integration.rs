//! End-to-end deliberation scenarios, driving `Orchestrator::orchestrate`
//! against the in-memory stub adapters the way `main.rs` wires them for the
//! demo binary. Each test exercises one of the terminal-outcome scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;

use conclave_deliberation::domain::context::{ContextPackage, PetitionSnapshot, SeverityTier};
use conclave_deliberation::domain::deadlock::DeadlockHandler;
use conclave_deliberation::domain::dispatcher::TimeoutJobDispatcher;
use conclave_deliberation::domain::phase_executor::{PhaseExecutionFailure, PhaseExecutor, PhaseResult};
use conclave_deliberation::domain::ports::{ArchonDescriptor, ArchonPool, PetitionRepository};
use conclave_deliberation::domain::stubs::{
    InMemoryEventSink, InMemoryJobScheduler, InMemoryPetitionRepository, InMemorySessionRepository, InMemoryWitnessStore,
    ScriptedPhaseExecutor, StaticArchonPool,
};
use conclave_deliberation::domain::substitution::SubstitutionHandler;
use conclave_deliberation::domain::timeout::{TimeoutHandler, DELIBERATION_TIMEOUT_JOB_TYPE};
use conclave_deliberation::domain::{Disposition, Orchestrator, Phase, Session};
use conclave_deliberation::events::domain::DomainEvent;
use conclave_deliberation::types::{ArchonId, Config, PetitionId};

fn archons() -> [ArchonId; 3] {
    [ArchonId::new(), ArchonId::new(), ArchonId::new()]
}

fn snapshot(petition_id: PetitionId) -> PetitionSnapshot {
    PetitionSnapshot {
        petition_id,
        petition_text: "repave the north commons road before winter".to_string(),
        petition_type: "infrastructure".to_string(),
        co_signer_count: 128,
        submitter_id: Some("citizen-412".to_string()),
        realm: "north-ward".to_string(),
        submitted_at: Utc::now(),
        severity_tier: SeverityTier::Medium,
        severity_signals: serde_json::json!({"flagged_keywords": []}),
    }
}

fn build_package(session: &Session) -> ContextPackage {
    ContextPackage::build(&snapshot(session.petition_id), session.session_id, session.assigned_archons, session.petition_id).unwrap()
}

/// A `PhaseExecutor` that plays back a fixed script of per-phase outcomes,
/// for scenarios `ScriptedPhaseExecutor` can't express (archon-attributable
/// failures, slow phases). Each phase is consulted once per call; retries
/// after a substitution re-invoke the same closure with the post-substitution
/// session.
struct ScriptPhaseExecutor {
    votes: HashMap<ArchonId, Disposition>,
    assess_failure: Option<(ArchonId, &'static str)>,
    position_failure: Option<(ArchonId, &'static str)>,
    position_delay: Option<Duration>,
}

fn result_for(phase: Phase, session: &Session, transcript: &str, metadata: serde_json::Value) -> PhaseResult {
    let now = Utc::now();
    PhaseResult { phase, transcript: transcript.to_string(), participants: session.current_active_archons().to_vec(), started_at: now, completed_at: now, phase_metadata: metadata }
}

#[async_trait]
impl PhaseExecutor for ScriptPhaseExecutor {
    async fn execute_assess(&self, session: &Session, _package: &ContextPackage) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        if let Some((archon_id, reason)) = self.assess_failure {
            if session.is_archon_assigned(archon_id) {
                return Err(PhaseExecutionFailure::new(Phase::Assess, reason, Some(archon_id)));
            }
        }
        Ok(result_for(Phase::Assess, session, "assess: petition reviewed", serde_json::json!({})))
    }

    async fn execute_position(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _assess: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        if let Some((archon_id, reason)) = self.position_failure {
            if session.is_archon_assigned(archon_id) {
                return Err(PhaseExecutionFailure::new(Phase::Position, reason, Some(archon_id)));
            }
        }
        if let Some(delay) = self.position_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(result_for(Phase::Position, session, "position: dispositions staked", serde_json::json!({})))
    }

    async fn execute_cross_examine(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _previous: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(result_for(Phase::CrossExamine, session, "cross-examine: challenged and defended", serde_json::json!({"rounds_completed": 1, "challenges_raised": 0})))
    }

    async fn execute_vote(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _cross_examine: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(result_for(Phase::Vote, session, "vote: dispositions cast", serde_json::json!({"votes": self.votes})))
    }
}

struct FixedPool(Vec<ArchonId>);

#[async_trait]
impl ArchonPool for FixedPool {
    async fn list_all(&self) -> conclave_deliberation::Result<Vec<ArchonDescriptor>> {
        Ok(self.0.iter().map(|id| ArchonDescriptor { archon_id: *id }).collect())
    }
}

/// Scenario 1: unanimous ACKNOWLEDGE.
#[tokio::test]
async fn unanimous_acknowledge_resolves_on_the_first_round() {
    let [a1, a2, a3] = archons();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let votes = HashMap::from([(a1, Disposition::Acknowledge), (a2, Disposition::Acknowledge), (a3, Disposition::Acknowledge)]);
    let executor = Arc::new(ScriptedPhaseExecutor::new(votes));
    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let event_sink = Arc::new(InMemoryEventSink::new());
    let config = Config::default_preset();

    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());
    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        None,
        witness_store,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let (final_session, result) = orchestrator.orchestrate(session, package).await.unwrap();

    assert_eq!(result.outcome, Some(Disposition::Acknowledge));
    assert!(!result.is_aborted);
    assert_eq!(final_session.phase, Phase::Complete);
    assert_eq!(final_session.round_count, 1);
    assert_eq!(result.phase_results.len(), 4);

    let events = event_sink.events().await;
    assert!(events.iter().any(|e| matches!(e, DomainEvent::DeliberationCompleted(c) if c.outcome == Disposition::Acknowledge)));
}

/// Scenario 2: a 2-1 split with one dissenting archon resolves to REFER.
#[tokio::test]
async fn two_one_split_resolves_with_a_dissenter() {
    let [a1, a2, a3] = archons();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let votes = HashMap::from([(a1, Disposition::Refer), (a2, Disposition::Refer), (a3, Disposition::Acknowledge)]);
    let executor = Arc::new(ScriptedPhaseExecutor::new(votes));
    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let config = Config::default_preset();
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        None,
        witness_store,
        Arc::clone(&session_repository) as _,
        None,
        config,
    );

    let (_, result) = orchestrator.orchestrate(session, package).await.unwrap();

    assert_eq!(result.outcome, Some(Disposition::Refer));
    assert_eq!(result.dissent_archon_id, Some(a3));
}

/// Scenario 3: a repeated 1-1-1 split across three rounds forces ESCALATE.
#[tokio::test]
async fn repeated_deadlock_escalates_at_the_round_ceiling() {
    let [a1, a2, a3] = archons();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let votes = HashMap::from([(a1, Disposition::Acknowledge), (a2, Disposition::Refer), (a3, Disposition::Escalate)]);
    let executor = Arc::new(ScriptedPhaseExecutor::new(votes));
    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let event_sink = Arc::new(InMemoryEventSink::new());
    let config = Config::default_preset(); // max_rounds = 3
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        None,
        witness_store,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let (final_session, result) = orchestrator.orchestrate(session, package).await.unwrap();

    assert_eq!(result.outcome, Some(Disposition::Escalate));
    assert!(final_session.is_deadlocked);
    assert_eq!(final_session.round_count, 3);

    let events = event_sink.events().await;
    let rounds_triggered = events.iter().filter(|e| matches!(e, DomainEvent::CrossExamineRoundTriggered(_))).count();
    assert_eq!(rounds_triggered, 2);
    assert!(events.iter().any(|e| matches!(e, DomainEvent::DeadlockDetected(_))));
}

/// Scenario 4: the deliberation-wide timeout fires while POSITION is still
/// in flight (`timeout_seconds = 1`, POSITION delayed 2 seconds — spec.md
/// §8 scenario 4). The timeout worker wins the race, forcing the session to
/// ESCALATE via `force_timeout`; the orchestrator's checkpoint on resuming
/// POSITION must then lose its own compare-and-swap and surface
/// `SessionAlreadyComplete` cleanly rather than silently overwriting it.
#[tokio::test]
async fn timeout_mid_position_wins_the_race_over_the_orchestrator() {
    let [a1, a2, a3] = archons();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let session_id = session.session_id;
    let package = build_package(&session);

    let votes = HashMap::from([(a1, Disposition::Acknowledge), (a2, Disposition::Acknowledge), (a3, Disposition::Acknowledge)]);
    let executor = Arc::new(ScriptPhaseExecutor { votes, assess_failure: None, position_failure: None, position_delay: Some(Duration::from_secs(2)) });

    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let event_sink = Arc::new(InMemoryEventSink::new());

    let config = Config { timeout_seconds: 1, max_rounds: 3 };
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());
    let dispatcher = Arc::new(TimeoutJobDispatcher::new(
        TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone()),
        Some(Arc::clone(&event_sink) as _),
    ));

    let poller = job_scheduler.start_polling(DELIBERATION_TIMEOUT_JOB_TYPE, Duration::from_millis(50), move |payload| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let _ = dispatcher.dispatch(payload).await;
        }
    });

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        None,
        witness_store,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let outcome = orchestrator.orchestrate(session, package).await;
    poller.stop().await;

    assert!(matches!(outcome, Err(conclave_deliberation::Error::SessionAlreadyComplete { .. })));

    let final_session = session_repository.get(session_id).await.unwrap();
    assert_eq!(final_session.phase, Phase::Complete);
    assert!(final_session.timed_out);
    assert_eq!(final_session.outcome, Some(Disposition::Escalate));

    let events = event_sink.events().await;
    assert!(events.iter().any(|e| matches!(e, DomainEvent::DeliberationTimeoutExpired(expired) if expired.phase_at_timeout == Phase::Position)));
}

/// Scenario 5: POSITION fails for one archon with a spare available in the
/// pool — the substitution handler swaps it in and the deliberation
/// completes normally.
#[tokio::test]
async fn single_archon_substitution_succeeds_and_completes() {
    let [a1, a2, a3] = archons();
    let spare = ArchonId::new();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let votes = HashMap::from([(spare, Disposition::Acknowledge), (a2, Disposition::Acknowledge), (a3, Disposition::Acknowledge)]);
    let executor = Arc::new(ScriptPhaseExecutor {
        votes,
        assess_failure: None,
        position_failure: Some((a1, "response timed out")),
        position_delay: None,
    });

    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let event_sink = Arc::new(InMemoryEventSink::new());
    let archon_pool = Arc::new(FixedPool(vec![a1, a2, a3, spare]));
    let config = Config::default_preset();
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());
    let substitution_handler = SubstitutionHandler::new(Arc::clone(&archon_pool) as _);

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        Some(substitution_handler),
        witness_store,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let (final_session, result) = orchestrator.orchestrate(session, package).await.unwrap();

    assert_eq!(result.outcome, Some(Disposition::Acknowledge));
    assert_eq!(final_session.substitutions.len(), 1);
    assert_eq!(final_session.substitutions[0].failed_archon_id, a1);
    assert_eq!(final_session.substitutions[0].substitute_archon_id, spare);
    assert!(final_session.current_active_archons().contains(&spare));

    let events = event_sink.events().await;
    assert!(events.iter().any(|e| matches!(e, DomainEvent::ArchonSubstituted(_))));
}

/// Scenario 6: ASSESS fails for an archon with no pool spare available — the
/// deliberation aborts straight to ESCALATE.
#[tokio::test]
async fn assess_failure_with_no_spare_aborts_to_escalate() {
    let [a1, a2, a3] = archons();
    let session = Session::create(PetitionId::new(), [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let executor = Arc::new(ScriptPhaseExecutor {
        votes: HashMap::new(),
        assess_failure: Some((a1, "upstream returned 503")),
        position_failure: None,
        position_delay: None,
    });

    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let event_sink = Arc::new(InMemoryEventSink::new());
    // No spare beyond the three assigned archons.
    let archon_pool = Arc::new(StaticArchonPool::new([a1, a2, a3]));
    let config = Config::default_preset();
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());
    let substitution_handler = SubstitutionHandler::new(Arc::clone(&archon_pool) as _);

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        Some(substitution_handler),
        witness_store,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let (final_session, result) = orchestrator.orchestrate(session, package).await.unwrap();

    assert!(result.is_aborted);
    assert_eq!(result.outcome, Some(Disposition::Escalate));
    assert!(final_session.is_aborted);
    assert_eq!(
        final_session.abort_reason,
        Some(conclave_deliberation::domain::session::AbortReason::ArchonPoolExhausted)
    );

    let events = event_sink.events().await;
    let aborted = events.iter().find_map(|e| match e {
        DomainEvent::DeliberationAborted(aborted) => Some(aborted),
        _ => None,
    });
    let aborted = aborted.expect("expected a DeliberationAborted event");
    assert_eq!(aborted.failed_archons.len(), 1);
    assert_eq!(aborted.failed_archons[0].archon_id, a1);
    assert_eq!(aborted.failed_archons[0].phase, Phase::Assess);
}

/// Integration of the petition repository's CAS with a completed
/// deliberation's outcome, the way `main.rs` wires it.
#[tokio::test]
async fn completed_deliberation_assigns_the_petitions_fate_via_cas() {
    let [a1, a2, a3] = archons();
    let petition_id = PetitionId::new();
    let session = Session::create(petition_id, [a1, a2, a3]).unwrap();
    let package = build_package(&session);

    let votes = HashMap::from([(a1, Disposition::Acknowledge), (a2, Disposition::Acknowledge), (a3, Disposition::Acknowledge)]);
    let executor = Arc::new(ScriptedPhaseExecutor::new(votes));
    let session_repository = Arc::new(InMemorySessionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());
    let petition_repository = Arc::new(InMemoryPetitionRepository::new());
    let config = Config::default_preset();
    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(DeadlockHandler::new()),
        None,
        witness_store,
        Arc::clone(&session_repository) as _,
        None,
        config,
    );

    let (_, result) = orchestrator.orchestrate(session, package).await.unwrap();
    let outcome = result.outcome.unwrap();
    let new_state = conclave_deliberation::events::translation::disposition_to_petition_state(outcome);
    petition_repository
        .assign_fate_cas(petition_id, conclave_deliberation::domain::ports::PetitionState::Deliberating, new_state, None, None)
        .await
        .unwrap();

    assert_eq!(petition_repository.state_of(petition_id).await, new_state);
}
