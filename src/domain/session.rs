//! The deliberation session aggregate (C1).
//!
//! `Session` is a frozen value: every named transition method consumes `&self`
//! and returns a freshly-versioned `Session`, never mutating the receiver.
//! This mirrors the immutable `with_*` methods of the original deliberation
//! model, adapted to Rust's ownership idiom instead of a frozen dataclass.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::config::{CONSENSUS_THRESHOLD, MAX_SUBSTITUTIONS, REQUIRED_ARCHON_COUNT};
use crate::types::{ArchonId, Error, JobId, PetitionId, Result, SessionId};

/// Reason a constant string is attached to whenever the round ceiling is hit
/// on a 1-1-1 split.
pub const DEADLOCK_REASON: &str = "DEADLOCK_MAX_ROUNDS_EXCEEDED";

/// The four working phases plus the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Assess,
    Position,
    CrossExamine,
    Vote,
    Complete,
}

impl Phase {
    /// The phase that normally follows this one. `Complete` has no successor.
    pub fn next_phase(self) -> Option<Phase> {
        match self {
            Phase::Assess => Some(Phase::Position),
            Phase::Position => Some(Phase::CrossExamine),
            Phase::CrossExamine => Some(Phase::Vote),
            Phase::Vote => Some(Phase::Complete),
            Phase::Complete => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete)
    }
}

/// The three possible terminal dispositions of a petition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Acknowledge,
    Refer,
    Escalate,
}

/// Why a phase-execution failure is attributed to a single archon. Mirrors
/// the three reason strings the phase executor's failures classify into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    ResponseTimeout,
    ApiError,
    InvalidResponse,
}

/// Why a deliberation was aborted rather than substituted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    InsufficientArchons,
    ArchonPoolExhausted,
}

/// A single archon substitution applied to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchonSubstitution {
    pub failed_archon_id: ArchonId,
    pub substitute_archon_id: ArchonId,
    pub phase_at_failure: Phase,
    pub failure_reason: FailureReason,
    pub substituted_at: DateTime<Utc>,
}

/// The deliberation session aggregate.
///
/// Constructed once via [`Session::create`] and thereafter only ever replaced
/// by the value returned from one of its transition methods. See the
/// invariants enumerated in `SPEC_FULL.md` §3; each is checked at the point
/// where it could otherwise be violated, not re-validated on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub petition_id: PetitionId,
    pub assigned_archons: [ArchonId; 3],
    pub phase: Phase,
    pub phase_transcripts: HashMap<Phase, [u8; 32]>,
    pub votes: HashMap<ArchonId, Disposition>,
    pub outcome: Option<Disposition>,
    pub dissent_archon_id: Option<ArchonId>,
    pub round_count: u32,
    pub votes_by_round: Vec<BTreeMap<Disposition, u8>>,
    pub is_deadlocked: bool,
    pub deadlock_reason: Option<String>,
    pub timed_out: bool,
    pub timeout_job_id: Option<JobId>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub substitutions: Vec<ArchonSubstitution>,
    pub is_aborted: bool,
    pub abort_reason: Option<AbortReason>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a freshly-assigned session in `Phase::Assess`. Refuses unless
    /// the three archons are pairwise distinct (invariant 1).
    pub fn create(petition_id: PetitionId, assigned_archons: [ArchonId; 3]) -> Result<Self> {
        Self::validate_archons(&assigned_archons)?;
        let now = Utc::now();
        Ok(Self {
            session_id: SessionId::new(),
            petition_id,
            assigned_archons,
            phase: Phase::Assess,
            phase_transcripts: HashMap::new(),
            votes: HashMap::new(),
            outcome: None,
            dissent_archon_id: None,
            round_count: 1,
            votes_by_round: Vec::new(),
            is_deadlocked: false,
            deadlock_reason: None,
            timed_out: false,
            timeout_job_id: None,
            timeout_at: None,
            substitutions: Vec::new(),
            is_aborted: false,
            abort_reason: None,
            version: 0,
            created_at: now,
            completed_at: None,
        })
    }

    fn validate_archons(archons: &[ArchonId; 3]) -> Result<()> {
        let distinct: std::collections::HashSet<_> = archons.iter().collect();
        if distinct.len() != REQUIRED_ARCHON_COUNT {
            return Err(Error::invalid_archon_assignment(distinct.len()));
        }
        Ok(())
    }

    /// The current panel, with any substituted archon already swapped in.
    pub fn current_active_archons(&self) -> [ArchonId; 3] {
        let mut active = self.assigned_archons;
        for sub in &self.substitutions {
            for slot in active.iter_mut() {
                if *slot == sub.failed_archon_id {
                    *slot = sub.substitute_archon_id;
                }
            }
        }
        active
    }

    pub fn is_archon_assigned(&self, archon_id: ArchonId) -> bool {
        self.current_active_archons().contains(&archon_id)
    }

    pub fn has_timeout_scheduled(&self) -> bool {
        self.timeout_job_id.is_some()
    }

    pub fn can_substitute(&self) -> bool {
        self.substitutions.len() < MAX_SUBSTITUTIONS
    }

    pub fn get_archon_vote(&self, archon_id: ArchonId) -> Option<Disposition> {
        self.votes.get(&archon_id).copied()
    }

    fn with_bumped_version(mut self) -> Self {
        self.version += 1;
        self
    }

    fn refuse_if_terminal(&self) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(Error::session_already_complete(
                self.session_id,
                "session has already reached Phase::Complete",
            ));
        }
        Ok(())
    }

    /// Move to the next phase in the normal sequence. Refuses any
    /// non-successor move and any move out of a terminal phase.
    pub fn advance_phase(&self, next: Phase) -> Result<Self> {
        self.refuse_if_terminal()?;
        let expected = self.phase.next_phase().unwrap_or(Phase::Complete);
        if next != expected {
            return Err(Error::invalid_phase_transition(self.phase, next, expected));
        }
        let mut session = self.clone();
        session.phase = next;
        Ok(session.with_bumped_version())
    }

    /// Attach the transcript hash produced for `phase`.
    pub fn record_transcript(&self, phase: Phase, hash: [u8; 32]) -> Result<Self> {
        self.refuse_if_terminal()?;
        let mut session = self.clone();
        session.phase_transcripts.insert(phase, hash);
        Ok(session.with_bumped_version())
    }

    /// Record the three votes cast in the current VOTE phase. Every voter
    /// must be a currently active archon and exactly three votes must be
    /// present (invariant 2 depends on this).
    pub fn record_votes(&self, votes: HashMap<ArchonId, Disposition>) -> Result<Self> {
        self.refuse_if_terminal()?;
        if votes.len() != REQUIRED_ARCHON_COUNT {
            return Err(Error::invalid_archon_assignment(votes.len()));
        }
        let active = self.current_active_archons();
        for archon_id in votes.keys() {
            if !active.contains(archon_id) {
                return Err(Error::invalid_archon_assignment(votes.len()));
            }
        }
        let mut session = self.clone();
        session.votes = votes;
        Ok(session.with_bumped_version())
    }

    /// Tally `votes` and resolve to the disposition with at least
    /// `CONSENSUS_THRESHOLD` votes. Fails with `ConsensusNotReached` on a
    /// 1-1-1 split (the caller is expected to hand that off to the deadlock
    /// handler instead of treating it as fatal).
    pub fn resolve_consensus(&self) -> Result<Self> {
        self.refuse_if_terminal()?;
        if self.votes.len() != REQUIRED_ARCHON_COUNT {
            return Err(Error::consensus_not_reached(
                self.votes.len() as u8,
                REQUIRED_ARCHON_COUNT as u8,
            ));
        }

        let distribution = vote_distribution(&self.votes);
        let winner = distribution
            .iter()
            .find(|(_, count)| **count >= CONSENSUS_THRESHOLD)
            .map(|(disposition, _)| *disposition);

        let Some(outcome) = winner else {
            return Err(Error::consensus_not_reached(0, CONSENSUS_THRESHOLD as u8));
        };

        let dissent_archon_id = self
            .votes
            .iter()
            .find(|(_, disposition)| **disposition != outcome)
            .map(|(archon_id, _)| *archon_id);

        let mut session = self.clone();
        session.outcome = Some(outcome);
        session.dissent_archon_id = dissent_archon_id;
        session.phase = Phase::Complete;
        session.completed_at = Some(Utc::now());
        Ok(session.with_bumped_version())
    }

    /// Start a new CROSS_EXAMINE round after a 1-1-1 split, recording the
    /// distribution that triggered the retry.
    pub fn begin_new_round(&self, previous_distribution: BTreeMap<Disposition, u8>) -> Result<Self> {
        self.refuse_if_terminal()?;
        let mut session = self.clone();
        session.votes_by_round.push(previous_distribution);
        session.round_count += 1;
        session.votes.clear();
        session.phase = Phase::CrossExamine;
        Ok(session.with_bumped_version())
    }

    /// Force ESCALATE after the round ceiling is hit on a repeated 1-1-1.
    pub fn force_deadlock(&self, final_distribution: BTreeMap<Disposition, u8>) -> Result<Self> {
        self.refuse_if_terminal()?;
        let mut session = self.clone();
        session.votes_by_round.push(final_distribution);
        session.outcome = Some(Disposition::Escalate);
        session.is_deadlocked = true;
        session.deadlock_reason = Some(DEADLOCK_REASON.to_string());
        session.dissent_archon_id = None;
        session.phase = Phase::Complete;
        session.completed_at = Some(Utc::now());
        Ok(session.with_bumped_version())
    }

    /// Attach a scheduled timeout job. Refuses if one is already scheduled.
    pub fn schedule_timeout(&self, job_id: JobId, fires_at: DateTime<Utc>) -> Result<Self> {
        self.refuse_if_terminal()?;
        if self.has_timeout_scheduled() {
            return Err(Error::internal(format!(
                "timeout already scheduled for session {}",
                self.session_id
            )));
        }
        let mut session = self.clone();
        session.timeout_job_id = Some(job_id);
        session.timeout_at = Some(fires_at);
        Ok(session.with_bumped_version())
    }

    /// Clear a scheduled timeout. A no-op (returned unchanged, no version
    /// bump) if nothing was scheduled — see property (I) in SPEC_FULL §8.
    pub fn cancel_timeout(&self) -> Self {
        if !self.has_timeout_scheduled() {
            return self.clone();
        }
        let mut session = self.clone();
        session.timeout_job_id = None;
        session.timeout_at = None;
        session.with_bumped_version()
    }

    /// Force ESCALATE because the scheduled deadline fired.
    pub fn force_timeout(&self) -> Result<Self> {
        self.refuse_if_terminal()?;
        let mut session = self.clone();
        session.timed_out = true;
        session.outcome = Some(Disposition::Escalate);
        session.phase = Phase::Complete;
        session.completed_at = Some(Utc::now());
        Ok(session.with_bumped_version())
    }

    /// Replace `failed_archon_id` with `substitute_archon_id` in the active
    /// panel. Refuses if the cap is reached, the failed id is not currently
    /// active, or the two ids coincide.
    pub fn apply_substitution(
        &self,
        failed_archon_id: ArchonId,
        substitute_archon_id: ArchonId,
        phase_at_failure: Phase,
        failure_reason: FailureReason,
    ) -> Result<Self> {
        self.refuse_if_terminal()?;
        if !self.can_substitute() {
            return Err(Error::internal(format!(
                "substitution cap of {MAX_SUBSTITUTIONS} already reached for session {}",
                self.session_id
            )));
        }
        if failed_archon_id == substitute_archon_id {
            return Err(Error::invalid_archon_assignment(1));
        }
        if !self.is_archon_assigned(failed_archon_id) {
            return Err(Error::invalid_archon_assignment(0));
        }
        let mut session = self.clone();
        session.substitutions.push(ArchonSubstitution {
            failed_archon_id,
            substitute_archon_id,
            phase_at_failure,
            failure_reason,
            substituted_at: Utc::now(),
        });
        Ok(session.with_bumped_version())
    }

    /// Force ESCALATE because substitution could not proceed.
    pub fn force_abort(&self, reason: AbortReason) -> Result<Self> {
        self.refuse_if_terminal()?;
        let mut session = self.clone();
        session.is_aborted = true;
        session.abort_reason = Some(reason);
        session.outcome = Some(Disposition::Escalate);
        session.phase = Phase::Complete;
        session.completed_at = Some(Utc::now());
        Ok(session.with_bumped_version())
    }
}

/// Tally a vote map into a sorted disposition -> count distribution.
pub fn vote_distribution(votes: &HashMap<ArchonId, Disposition>) -> BTreeMap<Disposition, u8> {
    let mut distribution = BTreeMap::new();
    for disposition in votes.values() {
        *distribution.entry(*disposition).or_insert(0) += 1;
    }
    distribution
}
