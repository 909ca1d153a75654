//! Domain events emitted by the deliberation engine (§6.2) and the pure
//! translation from a resolved `Disposition` to the petition repository's
//! state vocabulary.

pub mod domain;
pub mod translation;

pub use domain::DomainEvent;
pub use translation::disposition_to_petition_state;
