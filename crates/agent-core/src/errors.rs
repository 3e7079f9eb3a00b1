use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_loop::RunState;
use crate::history::HistoryError;

/// Error taxonomy attached to recorded steps and run outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad action name or arguments, or unusable model output.
    Validation,
    /// Rate limit or network trouble that outlived the retry budget.
    TransientEngine,
    /// Non-retryable engine error.
    EngineFailure,
    /// Handler level failure, timeout or panic.
    ActionExecution,
    EnvironmentLost,
    StepLimitExceeded,
    TooManyFailures,
    CancellationRequested,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientEngine => "transient_engine",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::ActionExecution => "action_execution",
            ErrorKind::EnvironmentLost => "environment_lost",
            ErrorKind::StepLimitExceeded => "step_limit_exceeded",
            ErrorKind::TooManyFailures => "too_many_failures",
            ErrorKind::CancellationRequested => "cancellation_requested",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors emitted by the agent-core crate.
///
/// Failures inside a run never surface here; they end up in the history and
/// the run outcome. These are misuse of the control surface and I/O.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cannot {operation} while the agent is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("replay of step {sequence} failed at `{action}`: {message}")]
    Replay {
        sequence: u32,
        action: String,
        message: String,
    },
}

impl AgentError {
    pub fn invalid_state(operation: &'static str, state: RunState) -> Self {
        Self::InvalidState { operation, state }
    }
}
