//! # Taskgate Core Library
//!
//! Verification-gated task execution: a task may only start or finish
//! after an external verifier confirms it (or its window times out), its
//! reward is computed from how it actually ran, and the rest of the day's
//! timeline shifts forward to absorb the difference.
//!
//! ## Architecture
//!
//! - **State machine**: a pure transition function plus an engine that
//!   serializes every step behind one lock and carries out its effects
//! - **Timers**: one-shot countdowns on the Tokio runtime, at most one per
//!   task and phase
//! - **Timeline**: forward-only cascade that keeps a day's slots
//!   non-overlapping
//! - **Rewards**: gold per planned minute with timeout penalties
//!
//! ## Key Components
//!
//! - [`VerificationEngine`]: transition entry points and event stream
//! - [`TaskStore`]: persistence seam, with [`InMemoryTaskStore`]
//! - [`Timeline`]: slot model and adjuster
//! - [`Config`]: TOML configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod keywords;
pub mod machine;
pub mod reward;
pub mod store;
pub mod task;
pub mod timeline;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ConfigError, CoreError, Result, ValidationError};
pub use events::Event;
pub use keywords::{match_keywords, MatchReport};
pub use machine::{Action, EngineConfig, Evidence, InvalidTransition, Outcome, VerificationEngine};
pub use reward::{compute_reward, RewardBreakdown, RewardPolicy, RewardReason};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Phase, Posture, Task, TaskPatch, TaskStatus, VerificationConfig};
pub use timeline::{adjust_spanning_days, Slot, SlotChange, Timeline};
pub use timer::{CountdownTimers, TimeoutSink, TimerHandle, TimerKey};
