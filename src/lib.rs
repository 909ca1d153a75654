//! # Conclave Deliberation Engine
//!
//! A structured four-phase, three-archon adjudication protocol for routing
//! petitions to one of three terminal dispositions: ACKNOWLEDGE, REFER, or
//! ESCALATE.
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────────────────────┐
//!  ContextPackage  →  │         Orchestrator          │
//!                     │  ┌─────────┐  ┌────────────┐  │
//!                     │  │ Timeout │  │  Deadlock  │  │
//!                     │  │ Handler │  │  Handler   │  │
//!                     │  └─────────┘  └────────────┘  │
//!                     │  ┌──────────────┐              │
//!                     │  │ Substitution │              │
//!                     │  │   Handler    │              │
//!                     │  └──────────────┘              │
//!                     └──────────────────────────────┘
//!                                  │
//!                        Session (C1, immutable)
//! ```
//!
//! Every petition that enters deliberation leaves it in exactly one of the
//! three dispositions above, with a complete hash-chained transcript trail.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod domain;
pub mod events;
pub mod types;

pub mod observability;

pub use types::{Config, Error, Result};
