//! Conclave deliberation worker — demo entry point.
//!
//! Wires the in-memory reference adapters into an `Orchestrator` and runs a
//! single deliberation end to end, printing the resulting disposition and
//! the events it produced. A real deployment replaces every adapter in
//! `domain::stubs` with its production counterpart (a database-backed
//! `SessionRepository`, a durable `JobScheduler`, and a `PhaseExecutor` that
//! actually drives the three archons) behind the same port traits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use conclave_deliberation::domain::context::{ContextPackage, PetitionSnapshot, SeverityTier};
use conclave_deliberation::domain::ports::{PetitionRepository, PetitionState};
use conclave_deliberation::domain::stubs::{
    InMemoryEventSink, InMemoryJobScheduler, InMemoryPetitionRepository, InMemorySessionRepository, InMemoryWitnessStore,
    ScriptedPhaseExecutor, StaticArchonPool,
};
use conclave_deliberation::domain::{Disposition, Orchestrator, Session};
use conclave_deliberation::domain::deadlock::DeadlockHandler;
use conclave_deliberation::domain::substitution::SubstitutionHandler;
use conclave_deliberation::domain::timeout::TimeoutHandler;
use conclave_deliberation::events::{disposition_to_petition_state, DomainEvent};
use conclave_deliberation::types::{ArchonId, Config, PetitionId};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    conclave_deliberation::observability::init_tracing();

    let config = Config::default_preset();
    let archons = [ArchonId::new(), ArchonId::new(), ArchonId::new()];
    let petition_id = PetitionId::new();

    let session_repository = Arc::new(InMemorySessionRepository::new());
    let petition_repository = Arc::new(InMemoryPetitionRepository::new());
    let job_scheduler = Arc::new(InMemoryJobScheduler::new());
    let archon_pool = Arc::new(StaticArchonPool::new(archons.iter().copied().chain([ArchonId::new()])));
    let event_sink = Arc::new(InMemoryEventSink::new());
    let witness_store = Arc::new(InMemoryWitnessStore::new());

    let votes = HashMap::from([
        (archons[0], Disposition::Acknowledge),
        (archons[1], Disposition::Acknowledge),
        (archons[2], Disposition::Refer),
    ]);
    let executor = Arc::new(ScriptedPhaseExecutor::new(votes));

    let timeout_handler = TimeoutHandler::new(Arc::clone(&job_scheduler) as _, Arc::clone(&session_repository) as _, config.clone());
    let deadlock_handler = DeadlockHandler::new();
    let substitution_handler = SubstitutionHandler::new(Arc::clone(&archon_pool) as _);

    let orchestrator = Orchestrator::new(
        executor,
        timeout_handler,
        Some(deadlock_handler),
        Some(substitution_handler),
        Arc::clone(&witness_store) as _,
        Arc::clone(&session_repository) as _,
        Some(Arc::clone(&event_sink) as _),
        config,
    );

    let session = Session::create(petition_id, archons)?;
    let package = ContextPackage::build(
        &PetitionSnapshot {
            petition_id,
            petition_text: "repave the north commons road before winter".to_string(),
            petition_type: "infrastructure".to_string(),
            co_signer_count: 128,
            submitter_id: Some("citizen-412".to_string()),
            realm: "north-ward".to_string(),
            submitted_at: Utc::now(),
            severity_tier: SeverityTier::Medium,
            severity_signals: serde_json::json!({"flagged_keywords": []}),
        },
        session.session_id,
        session.assigned_archons,
        petition_id,
    )?;

    let (final_session, result) = orchestrator.orchestrate(session, package).await?;

    if let Some(outcome) = result.outcome {
        let new_state = disposition_to_petition_state(outcome);
        let (escalation_source, escalated_to_realm) = if new_state == PetitionState::Escalated {
            let source = if final_session.timed_out {
                "timed_out"
            } else if final_session.is_deadlocked {
                "is_deadlocked"
            } else {
                "is_aborted"
            };
            (Some(source), Some("north-ward"))
        } else {
            (None, None)
        };
        petition_repository
            .assign_fate_cas(petition_id, PetitionState::Deliberating, new_state, escalation_source, escalated_to_realm)
            .await?;
    }

    tracing::info!(
        session_id = %final_session.session_id,
        outcome = ?result.outcome,
        is_aborted = result.is_aborted,
        "deliberation complete"
    );

    for event in event_sink.events().await {
        match event {
            DomainEvent::DeliberationCompleted(e) => println!("DeliberationCompleted: {:?}", e.outcome),
            other => println!("{other:?}"),
        }
    }

    Ok(())
}
