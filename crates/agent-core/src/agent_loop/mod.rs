//! Agent Loop (Observe-Decide-Act) execution.
//!
//! The engine is consulted once per turn with the current browser state and
//! proposes a small batch of actions, which the registry validates in full
//! before any of it runs.
//!
//! # Architecture
//!
//! ```text
//! while running && steps < max:
//!     drain watchdog signals          // fatal ends the run
//!     state  = observe() + advisories
//!     batch  = engine.decide(state)   // retried, raced against fatals
//!     validate(batch) else record rejection
//!     results = execute(batch)        // stops at first failed/terminal
//!     history.append(step)
//! ```
//!
//! # Key Components
//!
//! - [`AgentLoopConfig`]: named, independently defaulted options
//! - [`Agent`]: the orchestrator and its control surface
//! - [`AgentOutput`]: engine output with rationale and the action batch
//! - [`RunOutcome`]: the user-facing result of a run

pub mod config;
pub mod controller;
pub mod types;

pub use config::{AgentLoopConfig, FinalActionsPolicy};
pub use controller::{Agent, StopHandle, ABORTED_MESSAGE};
pub use types::{AgentOutput, FailureReason, RunOutcome, RunState, Task};
