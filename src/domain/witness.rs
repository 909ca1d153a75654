//! Phase witness event construction (§4.7).
//!
//! Pairs with `ports::TranscriptWitnessStore`: the store computes and
//! verifies the hash on ingest, and this module builds the event record that
//! accompanies it onto the event sink. Every completed phase produces
//! exactly one of these — see property (W) in `SPEC_FULL.md` §8.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::Phase;
use crate::types::{ArchonId, SessionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWitnessEvent {
    pub session_id: SessionId,
    pub phase: Phase,
    pub transcript_hash: [u8; 32],
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub participants: Vec<ArchonId>,
    pub metadata: serde_json::Value,
}

impl PhaseWitnessEvent {
    pub fn new(
        session_id: SessionId,
        phase: Phase,
        transcript_hash: [u8; 32],
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        participants: Vec<ArchonId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self { session_id, phase, transcript_hash, started_at, completed_at, participants, metadata }
    }
}
