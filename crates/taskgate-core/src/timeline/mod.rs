//! Day timeline reconciliation.
//!
//! This module provides:
//! - The slot model of one day's ordered tasks
//! - The forward-only cascading shift that keeps slots non-overlapping
//!   after a task's actual start or finish moves it

mod adjuster;

pub use adjuster::{adjust_spanning_days, Slot, SlotChange, Timeline};
