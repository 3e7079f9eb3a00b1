//! Agent core: the execution loop that ties the action registry, the
//! watchdog supervisor and a reasoning engine together, plus the history
//! store every run writes to.

pub mod agent_loop;
pub mod engine;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod mock;
pub mod replay;

pub use agent_loop::{
    Agent, AgentLoopConfig, AgentOutput, FailureReason, FinalActionsPolicy, RunOutcome, RunState,
    StopHandle, Task,
};
pub use engine::{
    call_with_retry, DecisionRequest, EngineError, ReasoningEngine, RetryPolicy, ScriptedEngine,
};
pub use errors::{AgentError, ErrorKind, StepError};
pub use history::{AgentHistory, HistoryError, HistoryReader, StepOutcome, StepRecord};
pub use mock::MockBrowser;
pub use replay::{replay_history, ReplayOptions, ReplayReport};
