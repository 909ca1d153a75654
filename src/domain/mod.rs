//! Deliberation domain — the aggregate, its collaborators, and the
//! orchestrator that sequences them.
//!
//! Every transition on `Session` is pure: it takes `&self` and returns a new
//! `Session`, never mutating the receiver. Persistence (compare-and-swap on
//! `Session::version`) is an external concern behind `ports::SessionRepository`.

pub mod context;
pub mod deadlock;
pub mod dispatcher;
pub mod orchestrator;
pub mod phase_executor;
pub mod ports;
pub mod session;
pub mod stubs;
pub mod substitution;
pub mod timeout;
pub mod witness;

pub use context::ContextPackage;
pub use orchestrator::{DeliberationResult, Orchestrator};
pub use session::{Disposition, Phase, Session};
