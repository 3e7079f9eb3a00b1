//! Core data types for the agent loop.

use action_registry::{ActionCall, ActionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineError;
use crate::errors::ErrorKind;

/// The user's goal plus actions that run without consulting the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub goal: String,
    /// Run before the first engine turn.
    #[serde(default)]
    pub initial_actions: Vec<ActionCall>,
    /// Run after the loop stops, subject to the final actions policy.
    #[serde(default)]
    pub final_actions: Vec<ActionCall>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_initial_actions(mut self, actions: Vec<ActionCall>) -> Self {
        self.initial_actions = actions;
        self
    }

    pub fn with_final_actions(mut self, actions: Vec<ActionCall>) -> Self {
        self.final_actions = actions;
        self
    }
}

/// Engine output for a single turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Chain-of-thought reasoning about current state.
    #[serde(default)]
    pub thinking: String,

    /// Evaluation of whether the previous action achieved its goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_previous_goal: Option<String>,

    /// Important facts to remember for future steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Immediate next objective.
    #[serde(default)]
    pub next_goal: String,

    /// Proposed batch, in execution order.
    #[serde(default)]
    pub actions: Vec<ActionCall>,
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    thinking: String,
    #[serde(default)]
    evaluation_previous_goal: Option<String>,
    #[serde(default)]
    memory: Option<String>,
    #[serde(default)]
    next_goal: String,
    #[serde(default, alias = "action")]
    actions: Vec<Value>,
}

impl AgentOutput {
    pub fn new(actions: Vec<ActionCall>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    pub fn with_next_goal(mut self, goal: impl Into<String>) -> Self {
        self.next_goal = goal.into();
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    /// Parse raw model text. Fenced code blocks and prose around the JSON
    /// object are tolerated.
    pub fn from_model_text(raw: &str) -> Result<Self, EngineError> {
        let json = extract_json_object(raw)
            .ok_or_else(|| EngineError::InvalidOutput("no JSON object in model output".into()))?;
        let parsed: RawOutput = serde_json::from_str(&json)
            .map_err(|err| EngineError::InvalidOutput(format!("malformed output: {err}")))?;
        let actions = parsed
            .actions
            .into_iter()
            .map(ActionCall::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EngineError::InvalidOutput(format!("malformed action: {err}")))?;
        Ok(Self {
            thinking: parsed.thinking,
            evaluation_previous_goal: parsed.evaluation_previous_goal,
            memory: parsed.memory,
            next_goal: parsed.next_goal,
            actions,
        })
    }
}

fn extract_json_object(raw: &str) -> Option<String> {
    if raw.trim_start().starts_with('{') {
        return Some(trim_symmetric(raw));
    }

    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang =
            after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = &after_lang[..end];
            if block.contains('{') {
                return Some(trim_symmetric(block));
            }
        }
    }

    raw.split_once('{').and_then(|(_, rest)| {
        let mut depth = 1i32;
        for (idx, ch) in rest.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let mut candidate = String::from("{");
                        candidate.push_str(&rest[..=idx]);
                        return Some(trim_symmetric(&candidate));
                    }
                }
                _ => {}
            }
        }
        None
    })
}

fn trim_symmetric(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

/// Loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Done,
    Failed,
    Stopped,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Stopped => "stopped",
        }
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    EnvironmentLost,
    EngineUnavailable,
    StepLimitExceeded,
    TooManyFailures,
}

impl FailureReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FailureReason::EnvironmentLost => ErrorKind::EnvironmentLost,
            FailureReason::EngineUnavailable => ErrorKind::EngineFailure,
            FailureReason::StepLimitExceeded => ErrorKind::StepLimitExceeded,
            FailureReason::TooManyFailures => ErrorKind::TooManyFailures,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::EnvironmentLost => "environment_lost",
            FailureReason::EngineUnavailable => "engine_unavailable",
            FailureReason::StepLimitExceeded => "step_limit_exceeded",
            FailureReason::TooManyFailures => "too_many_failures",
        }
    }
}

/// User-facing result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Extracted content of the last recorded result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    /// Error of the last recorded result, or the reason the run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Steps in the history, across all tasks.
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_action_results: Vec<ActionResult>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    /// Content when present, otherwise the error.
    pub fn message(&self) -> Option<&str> {
        self.final_content.as_deref().or(self.error.as_deref())
    }
}
