//! Verification state machine.
//!
//! [`transition`] is the pure rule set: given a task, an action and the
//! current instant it yields a [`Step`] (a patch plus effects) or rejects
//! the action. [`VerificationEngine`] owns the store and the countdown
//! timers, serializes every step behind one lock and carries out the
//! effects.

mod engine;
mod transition;

pub use engine::{EngineConfig, Evidence, Outcome, VerificationEngine};
pub use transition::{transition, Action, Effect, InvalidTransition, Step};
