//! Deadlock Handler (C5).
//!
//! Grounded on `deadlock_handler_service.py`: detects a 1-1-1 vote split and
//! either re-enters CROSS_EXAMINE with an incremented round, or — once the
//! round ceiling is hit — drives the session to ESCALATE. Pure and
//! config-driven; no external collaborators.

use std::collections::BTreeMap;

use crate::domain::session::{Disposition, Phase, Session};
use crate::events::domain::{CrossExamineRoundTriggered, DeadlockDetected, EventEnvelope};
use crate::types::{Config, Error, Result};

const DELIBERATION_EVENT_SCHEMA_VERSION: u32 = 1;

/// The outcome of handling a non-consensus VOTE result: either another
/// round is triggered, or the session has been forced to a deadlock
/// ESCALATE.
#[derive(Debug)]
pub enum DeadlockOutcome {
    RoundTriggered { session: Session, event: CrossExamineRoundTriggered },
    Escalated { session: Session, event: DeadlockDetected },
}

#[derive(Debug, Default)]
pub struct DeadlockHandler;

impl DeadlockHandler {
    pub fn new() -> Self {
        Self
    }

    /// True iff `distribution` is exactly three votes split 1-1-1 across
    /// three distinct dispositions.
    pub fn is_one_one_one(distribution: &BTreeMap<Disposition, u8>) -> bool {
        let total: u8 = distribution.values().sum();
        total == 3 && distribution.len() == 3 && distribution.values().all(|count| *count == 1)
    }

    pub fn can_continue(session: &Session, config: &Config) -> bool {
        session.round_count < config.max_rounds
    }

    /// Dispatch a 1-1-1 split to either another round or a forced deadlock.
    /// Refuses if the session is terminal or `distribution` is not 1-1-1 (a
    /// 2-1 or 3-0 split must resolve via `Session::resolve_consensus`
    /// instead).
    pub fn handle_no_consensus(
        &self,
        session: &Session,
        distribution: BTreeMap<Disposition, u8>,
        config: &Config,
    ) -> Result<DeadlockOutcome> {
        if session.phase.is_terminal() {
            return Err(Error::session_already_complete(
                session.session_id,
                "cannot handle a deadlock on an already-complete session",
            ));
        }
        if !Self::is_one_one_one(&distribution) {
            return Err(Error::internal("handle_no_consensus called on a non-1-1-1 distribution"));
        }

        if Self::can_continue(session, config) {
            self.trigger_new_round(session, distribution)
        } else {
            self.trigger_deadlock_escalation(session, distribution)
        }
    }

    fn trigger_new_round(&self, session: &Session, distribution: BTreeMap<Disposition, u8>) -> Result<DeadlockOutcome> {
        let round_number = session.round_count + 1;
        let participating_archons = session.current_active_archons().to_vec();
        let updated = session.begin_new_round(distribution.clone())?;
        let event = CrossExamineRoundTriggered {
            envelope: EventEnvelope::new(session.session_id, session.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
            round_number,
            previous_vote_distribution: distribution,
            participating_archons,
        };
        Ok(DeadlockOutcome::RoundTriggered { session: updated, event })
    }

    fn trigger_deadlock_escalation(&self, session: &Session, distribution: BTreeMap<Disposition, u8>) -> Result<DeadlockOutcome> {
        // Capture round bookkeeping and phase BEFORE the transition, since
        // `force_deadlock` advances `phase` to `Complete`.
        let phase_at_deadlock = session.phase;
        let round_count = session.round_count;
        let participating_archons = session.current_active_archons().to_vec();
        let mut votes_by_round = session.votes_by_round.clone();
        votes_by_round.push(distribution.clone());

        let updated = session.force_deadlock(distribution.clone())?;
        let event = DeadlockDetected {
            envelope: EventEnvelope::new(session.session_id, session.petition_id, DELIBERATION_EVENT_SCHEMA_VERSION),
            round_count,
            votes_by_round,
            final_vote_distribution: distribution,
            phase_at_deadlock,
            participating_archons,
        };
        Ok(DeadlockOutcome::Escalated { session: updated, event })
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn disposition_triple() -> impl Strategy<Value = [Disposition; 3]> {
        prop_oneof![
            Just(Disposition::Acknowledge),
            Just(Disposition::Refer),
            Just(Disposition::Escalate),
        ]
        .prop_flat_map(|first| {
            prop_oneof![Just(Disposition::Acknowledge), Just(Disposition::Refer), Just(Disposition::Escalate)]
                .prop_flat_map(move |second| {
                    prop_oneof![Just(Disposition::Acknowledge), Just(Disposition::Refer), Just(Disposition::Escalate)]
                        .prop_map(move |third| [first, second, third])
                })
        })
    }

    fn tally(votes: [Disposition; 3]) -> BTreeMap<Disposition, u8> {
        let mut distribution = BTreeMap::new();
        for vote in votes {
            *distribution.entry(vote).or_insert(0) += 1;
        }
        distribution
    }

    proptest! {
        /// Over every reachable three-vote outcome, `is_one_one_one` is true
        /// exactly when all three archons picked a different disposition —
        /// never on a unanimous or a 2-1 split.
        #[test]
        fn is_one_one_one_matches_exactly_the_all_distinct_case(votes in disposition_triple()) {
            let distribution = tally(votes);
            let all_distinct = votes[0] != votes[1] && votes[1] != votes[2] && votes[0] != votes[2];
            prop_assert_eq!(DeadlockHandler::is_one_one_one(&distribution), all_distinct);
        }
    }
}
