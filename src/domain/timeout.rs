//! Timeout Handler (C4).
//!
//! Grounded on `deliberation_timeout_service.py`: schedules a single
//! deliberation-wide deadline through the job queue, cancels it on normal
//! completion, and drives the session to ESCALATE when the worker reports
//! the deadline fired.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::ports::{JobScheduler, SessionRepository};
use crate::domain::session::Session;
use crate::events::domain::{DeliberationTimeoutExpired, EventEnvelope};
use crate::types::{Config, Error, Result, SessionId};

/// Job type used on every scheduled deliberation deadline.
pub const DELIBERATION_TIMEOUT_JOB_TYPE: &str = "deliberation_timeout";

const DELIBERATION_TIMEOUT_SCHEMA_VERSION: u32 = 1;

pub struct TimeoutHandler {
    job_scheduler: Arc<dyn JobScheduler>,
    session_repository: Arc<dyn SessionRepository>,
    config: Config,
}

impl std::fmt::Debug for TimeoutHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandler").field("config", &self.config).finish()
    }
}

impl TimeoutHandler {
    pub fn new(
        job_scheduler: Arc<dyn JobScheduler>,
        session_repository: Arc<dyn SessionRepository>,
        config: Config,
    ) -> Self {
        Self { job_scheduler, session_repository, config }
    }

    /// Schedule the deliberation-wide deadline. Refuses if one is already
    /// scheduled or the session is terminal (delegated to
    /// `Session::schedule_timeout`).
    pub async fn schedule(&self, session: Session) -> Result<Session> {
        let fires_at = Utc::now() + self.config.timeout_duration();
        let payload = serde_json::json!({
            "session_id": session.session_id.to_string(),
            "petition_id": session.petition_id.to_string(),
            "timeout_seconds": self.config.timeout_seconds,
        });
        let job_id = self
            .job_scheduler
            .schedule(DELIBERATION_TIMEOUT_JOB_TYPE, payload, fires_at)
            .await?;
        session.schedule_timeout(job_id, fires_at)
    }

    /// Cancel the scheduled deadline. Idempotent: a session with no handle
    /// is returned unchanged, and cancelling after the job already fired is
    /// treated the same as a normal cancel (the job scheduler's cancel
    /// itself is expected to no-op on an already-fired job).
    pub async fn cancel(&self, session: Session) -> Result<Session> {
        if let Some(job_id) = session.timeout_job_id {
            self.job_scheduler.cancel(job_id).await?;
        }
        Ok(session.cancel_timeout())
    }

    /// The worker-side entrypoint: load the session, force it terminal, and
    /// build the timeout event. Propagates `SessionAlreadyComplete` when the
    /// orchestrator's normal-completion path won the race (§5) — callers on
    /// the job-queue side are expected to treat that as success.
    pub async fn handle(&self, session_id: SessionId) -> Result<(Session, DeliberationTimeoutExpired)> {
        let session = self.session_repository.get(session_id).await?;
        if session.phase.is_terminal() {
            return Err(Error::session_already_complete(
                session_id,
                "cannot time out an already-completed session",
            ));
        }

        let phase_at_timeout = session.phase;
        let started_at = session.created_at;
        let participating_archons = session.current_active_archons();
        let updated = session.force_timeout()?;
        self.session_repository.save(updated.clone()).await?;

        let event = DeliberationTimeoutExpired {
            envelope: EventEnvelope::new(
                updated.session_id,
                updated.petition_id,
                DELIBERATION_TIMEOUT_SCHEMA_VERSION,
            ),
            phase_at_timeout,
            started_at,
            timeout_at: Utc::now(),
            configured_timeout_seconds: self.config.timeout_seconds,
            participating_archons,
        };

        Ok((updated, event))
    }
}
