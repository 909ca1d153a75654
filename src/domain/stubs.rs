//! In-memory reference adapters for every port in `domain::ports`.
//!
//! Used by `main.rs`'s demo wiring and by integration tests. None of these
//! are meant for production: a real deployment backs `SessionRepository` and
//! `PetitionRepository` with a database, `JobScheduler` with a durable queue,
//! and `PhaseExecutor` with whatever actually drives the three archons.
//! `InMemoryJobScheduler::start_polling` mirrors the teacher's
//! `CleanupService::start`/`stop` background-task shape (`tokio::spawn` +
//! `oneshot` + `tokio::select!` + `tokio::time::interval`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::context::ContextPackage;
use crate::domain::phase_executor::{PhaseExecutionFailure, PhaseExecutor, PhaseResult};
use crate::domain::ports::{
    ArchonDescriptor, ArchonPool, EventSink, JobScheduler, PetitionRepository, PetitionState, SessionRepository,
    TranscriptWitnessStore,
};
use crate::domain::session::{Disposition, Phase, Session};
use crate::events::domain::DomainEvent;
use crate::types::{ArchonId, Error, JobId, PetitionId, Result, SessionId};

/// In-memory `SessionRepository`. `save` enforces the same optimistic
/// concurrency the port's doc comment requires: a write is only accepted if
/// it is the session's first save (`version == 0`) or it immediately
/// succeeds the version currently on record.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, session_id: SessionId) -> Result<Session> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id, "not present in the in-memory store"))
    }

    async fn save(&self, session: Session) -> Result<()> {
        let mut guard = self.sessions.lock().await;
        if let Some(existing) = guard.get(&session.session_id) {
            if existing.version + 1 != session.version {
                return Err(Error::internal(format!(
                    "stale write for session {}: stored version {}, incoming version {}",
                    session.session_id, existing.version, session.version
                )));
            }
        }
        guard.insert(session.session_id, session);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    job_type: String,
    payload: serde_json::Value,
    run_at: DateTime<Utc>,
}

/// In-memory `JobScheduler`. Jobs are held in a map until either `cancel`
/// removes them or a poller started with `start_polling` claims them.
#[derive(Debug, Default)]
pub struct InMemoryJobScheduler {
    jobs: Arc<Mutex<HashMap<JobId, ScheduledJob>>>,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a background poller that, once per `poll_interval`, claims every
    /// due job of `job_type` and calls `on_due` with its payload.
    pub fn start_polling<F, Fut>(&self, job_type: &'static str, poll_interval: std::time::Duration, on_due: F) -> JobPoller
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let jobs = Arc::clone(&self.jobs);
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let due = Self::claim_due(&jobs, job_type).await;
                        for payload in due {
                            on_due(payload).await;
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!(job_type, "job poller stopped");
                        break;
                    }
                }
            }
        });

        JobPoller { stop_tx: Some(stop_tx), handle }
    }

    async fn claim_due(jobs: &Arc<Mutex<HashMap<JobId, ScheduledJob>>>, job_type: &str) -> Vec<serde_json::Value> {
        let now = Utc::now();
        let mut guard = jobs.lock().await;
        let due_ids: Vec<JobId> = guard
            .iter()
            .filter(|(_, job)| job.job_type == job_type && job.run_at <= now)
            .map(|(id, _)| *id)
            .collect();
        due_ids.into_iter().filter_map(|id| guard.remove(&id).map(|job| job.payload)).collect()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn schedule(&self, job_type: &str, payload: serde_json::Value, run_at: DateTime<Utc>) -> Result<JobId> {
        let job_id = JobId::new();
        self.jobs.lock().await.insert(job_id, ScheduledJob { job_type: job_type.to_string(), payload, run_at });
        Ok(job_id)
    }

    async fn cancel(&self, job_id: JobId) -> Result<()> {
        self.jobs.lock().await.remove(&job_id);
        Ok(())
    }
}

/// Handle returned by `InMemoryJobScheduler::start_polling`. Dropping it
/// leaves the poller running; call `stop` to shut it down deterministically.
pub struct JobPoller {
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl JobPoller {
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// In-memory `PetitionRepository`, consumed only through its CAS primitive.
/// Petitions not yet seeded are treated as `Deliberating`, matching the
/// state every petition is expected to be in when a session is created for
/// it (§6.1).
#[derive(Debug, Default)]
pub struct InMemoryPetitionRepository {
    states: Mutex<HashMap<PetitionId, PetitionState>>,
    escalations: Mutex<HashMap<PetitionId, (String, String)>>,
}

impl InMemoryPetitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state_of(&self, petition_id: PetitionId) -> PetitionState {
        self.states.lock().await.get(&petition_id).copied().unwrap_or(PetitionState::Deliberating)
    }

    /// The `(escalation_source, escalated_to_realm)` recorded by the last
    /// `assign_fate_cas` call that carried them, if any.
    pub async fn escalation_of(&self, petition_id: PetitionId) -> Option<(String, String)> {
        self.escalations.lock().await.get(&petition_id).cloned()
    }
}

#[async_trait]
impl PetitionRepository for InMemoryPetitionRepository {
    async fn assign_fate_cas(
        &self,
        petition_id: PetitionId,
        expected_state: PetitionState,
        new_state: PetitionState,
        escalation_source: Option<&str>,
        escalated_to_realm: Option<&str>,
    ) -> Result<()> {
        let mut guard = self.states.lock().await;
        let current = guard.get(&petition_id).copied().unwrap_or(PetitionState::Deliberating);
        if current != expected_state {
            return Err(Error::internal(format!(
                "compare-and-swap failed for petition {petition_id}: expected {expected_state:?}, found {current:?}"
            )));
        }
        guard.insert(petition_id, new_state);
        if let (Some(source), Some(realm)) = (escalation_source, escalated_to_realm) {
            self.escalations.lock().await.insert(petition_id, (source.to_string(), realm.to_string()));
        }
        Ok(())
    }
}

/// `ArchonPool` backed by a fixed roster, for tests and the demo binary.
#[derive(Debug, Clone)]
pub struct StaticArchonPool(Vec<ArchonId>);

impl StaticArchonPool {
    pub fn new(archons: impl IntoIterator<Item = ArchonId>) -> Self {
        Self(archons.into_iter().collect())
    }
}

#[async_trait]
impl ArchonPool for StaticArchonPool {
    async fn list_all(&self) -> Result<Vec<ArchonDescriptor>> {
        Ok(self.0.iter().map(|id| ArchonDescriptor { archon_id: *id }).collect())
    }
}

/// `EventSink` that just accumulates events in memory, for assertions in
/// tests and for printing a summary from the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn append(&self, event: DomainEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// `TranscriptWitnessStore` that keeps transcripts in memory, keyed by their
/// own BLAKE3 hash.
#[derive(Debug, Default)]
pub struct InMemoryWitnessStore {
    transcripts: Mutex<HashMap<[u8; 32], String>>,
}

impl InMemoryWitnessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptWitnessStore for InMemoryWitnessStore {
    async fn append(
        &self,
        _session_id: SessionId,
        _phase: Phase,
        transcript: &str,
        _participants: &[ArchonId],
        _started_at: DateTime<Utc>,
        _completed_at: DateTime<Utc>,
    ) -> Result<[u8; 32]> {
        let hash = *blake3::hash(transcript.as_bytes()).as_bytes();
        self.transcripts.lock().await.insert(hash, transcript.to_string());
        Ok(hash)
    }
}

/// `PhaseExecutor` that returns a scripted, fixed vote rather than calling
/// out to anything — enough to drive the orchestrator end to end in tests
/// and in the demo binary without a real agent-invocation backend.
#[derive(Debug, Clone)]
pub struct ScriptedPhaseExecutor {
    votes: HashMap<ArchonId, Disposition>,
}

impl ScriptedPhaseExecutor {
    pub fn new(votes: HashMap<ArchonId, Disposition>) -> Self {
        Self { votes }
    }
}

fn scripted_result(phase: Phase, session: &Session, transcript: &str, metadata: serde_json::Value) -> PhaseResult {
    let now = Utc::now();
    PhaseResult {
        phase,
        transcript: transcript.to_string(),
        participants: session.current_active_archons().to_vec(),
        started_at: now,
        completed_at: now,
        phase_metadata: metadata,
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedPhaseExecutor {
    async fn execute_assess(&self, session: &Session, _package: &ContextPackage) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(scripted_result(Phase::Assess, session, "assess: petition reviewed against realm policy", serde_json::json!({})))
    }

    async fn execute_position(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _assess: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(scripted_result(Phase::Position, session, "position: each archon stakes an initial disposition", serde_json::json!({})))
    }

    async fn execute_cross_examine(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _previous: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(scripted_result(
            Phase::CrossExamine,
            session,
            "cross-examine: positions challenged and defended",
            serde_json::json!({"rounds_completed": 1, "challenges_raised": 0}),
        ))
    }

    async fn execute_vote(
        &self,
        session: &Session,
        _package: &ContextPackage,
        _cross_examine: &PhaseResult,
    ) -> std::result::Result<PhaseResult, PhaseExecutionFailure> {
        Ok(scripted_result(Phase::Vote, session, "vote: final dispositions cast", serde_json::json!({"votes": self.votes})))
    }
}
