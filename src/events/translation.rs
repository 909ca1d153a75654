//! Disposition → petition-repository-state translation.
//!
//! Pure deterministic mapping (§6.1): `ACKNOWLEDGE`/`REFER`/`ESCALATE` are
//! the only dispositions this engine ever produces, so only those three
//! arms are reachable; `Deferred`/`NoResponse` remain on `PetitionState` for
//! parity with the wider petition lifecycle but have no `Disposition` that
//! maps to them.

use crate::domain::ports::PetitionState;
use crate::domain::session::Disposition;

pub fn disposition_to_petition_state(disposition: Disposition) -> PetitionState {
    match disposition {
        Disposition::Acknowledge => PetitionState::Acknowledged,
        Disposition::Refer => PetitionState::Referred,
        Disposition::Escalate => PetitionState::Escalated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_maps_to_acknowledged() {
        assert_eq!(disposition_to_petition_state(Disposition::Acknowledge), PetitionState::Acknowledged);
    }

    #[test]
    fn refer_maps_to_referred() {
        assert_eq!(disposition_to_petition_state(Disposition::Refer), PetitionState::Referred);
    }

    #[test]
    fn escalate_maps_to_escalated() {
        assert_eq!(disposition_to_petition_state(Disposition::Escalate), PetitionState::Escalated);
    }
}
