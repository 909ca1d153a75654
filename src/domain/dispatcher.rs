//! Timeout Job Dispatcher (C8).
//!
//! The worker-side entrypoint a job-queue consumer calls when a
//! `deliberation_timeout` job comes due. Parses the session id out of the
//! job payload `timeout.rs` scheduled and hands off to the timeout handler
//! (C4); idempotent against a deliberation that already completed by the
//! time the job fired (SPEC_FULL.md §5).

use std::sync::Arc;

use crate::domain::ports::EventSink;
use crate::domain::timeout::TimeoutHandler;
use crate::events::domain::DomainEvent;
use crate::types::{Error, Result, SessionId};

pub struct TimeoutJobDispatcher {
    timeout_handler: TimeoutHandler,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for TimeoutJobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutJobDispatcher").finish()
    }
}

impl TimeoutJobDispatcher {
    pub fn new(timeout_handler: TimeoutHandler, event_sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { timeout_handler, event_sink }
    }

    /// Handle one due `deliberation_timeout` job. Returns `Ok(())` both when
    /// the timeout was applied and when it arrived too late to matter — only
    /// a genuine failure (an unknown session, a storage error) propagates.
    #[tracing::instrument(skip(self, payload))]
    pub async fn dispatch(&self, payload: serde_json::Value) -> Result<()> {
        let session_id = parse_session_id(&payload)?;

        match self.timeout_handler.handle(session_id).await {
            Ok((_, event)) => {
                if let Some(sink) = &self.event_sink {
                    sink.append(DomainEvent::DeliberationTimeoutExpired(event)).await?;
                }
                Ok(())
            }
            Err(Error::SessionAlreadyComplete { .. }) => {
                tracing::info!(
                    %session_id,
                    "timeout job arrived after the deliberation already completed; ignoring"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn parse_session_id(payload: &serde_json::Value) -> Result<SessionId> {
    let raw = payload
        .get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_job_payload("timeout job payload missing session_id"))?;
    SessionId::parse(raw).map_err(|_| Error::invalid_job_payload(format!("timeout job payload has invalid session_id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_session_id_rejects_a_missing_field() {
        let payload = serde_json::json!({});
        assert!(parse_session_id(&payload).is_err());
    }

    #[test]
    fn parse_session_id_rejects_malformed_uuids() {
        let payload = serde_json::json!({"session_id": "not-a-uuid"});
        assert!(parse_session_id(&payload).is_err());
    }

    #[test]
    fn parse_session_id_roundtrips_a_valid_id() {
        let id = SessionId::new();
        let payload = serde_json::json!({"session_id": id.to_string()});
        assert_eq!(parse_session_id(&payload).unwrap(), id);
    }

    /// A job that arrives after the deliberation already completed must be
    /// converted into a no-op, logged at `info` rather than propagated as a
    /// failure (SPEC_FULL.md §4.9, "idempotent under the job queue's
    /// at-least-once delivery").
    #[tracing_test::traced_test]
    #[tokio::test]
    async fn dispatch_treats_an_already_complete_session_as_a_logged_no_op() {
        use crate::domain::ports::SessionRepository as _;
        use crate::domain::session::Session;
        use crate::domain::stubs::{InMemoryJobScheduler, InMemorySessionRepository};
        use crate::types::{Config, PetitionId};
        use std::sync::Arc;

        let session_repository = Arc::new(InMemorySessionRepository::new());
        let job_scheduler = Arc::new(InMemoryJobScheduler::new());

        let session = Session::create(
            PetitionId::new(),
            [crate::types::ArchonId::new(), crate::types::ArchonId::new(), crate::types::ArchonId::new()],
        )
        .unwrap();
        let session_id = session.session_id;
        session_repository.save(session.clone()).await.unwrap();
        let completed = session.force_timeout().unwrap();
        session_repository.save(completed).await.unwrap();

        let timeout_handler = TimeoutHandler::new(job_scheduler as _, Arc::clone(&session_repository) as _, Config::default_preset());
        let dispatcher = TimeoutJobDispatcher::new(timeout_handler, None);

        let payload = serde_json::json!({"session_id": session_id.to_string()});
        dispatcher.dispatch(payload).await.unwrap();

        assert!(tracing_test::logs_contain("already completed"));
    }
}
