//! Configuration for the agent execution loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the task's final actions run after the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalActionsPolicy {
    /// Only after the run reached `Done`.
    #[default]
    OnDone,
    /// After `Done` or `Failed`; never after a stop request.
    OnDoneOrFailed,
    Never,
}

/// Configuration for the agent loop (observe-decide-act).
///
/// Every option defaults independently, so a partial YAML/JSON document
/// deserializes into a complete config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Engine turns allowed per task before the run fails.
    /// Default: 100
    pub max_steps: u32,

    /// Proposed batches are truncated to this many actions.
    /// Default: 3
    pub max_actions_per_step: u32,

    /// Consecutive failing steps before aborting the run. 0 disables the cap.
    /// Default: 3
    pub max_consecutive_failures: u32,

    /// Timeout per action dispatch in milliseconds.
    /// Default: 30000
    pub action_timeout_ms: u64,

    /// Timeout per reasoning engine attempt in milliseconds.
    /// Default: 60000
    pub llm_timeout_ms: u64,

    /// Timeout for the browser snapshot taken at the start of each turn.
    /// Default: 10000
    pub snapshot_timeout_ms: u64,

    /// Upper bound on the end-of-turn wait for observers to handle the
    /// events the turn produced.
    /// Default: 2000
    pub signal_settle_timeout_ms: u64,

    /// Attempts per engine call, including the first one.
    /// Default: 3
    pub llm_max_attempts: u32,

    /// Base delay of the exponential engine backoff.
    /// Default: 1000
    pub llm_retry_base_ms: u64,

    /// Upper bound for a single backoff delay.
    /// Default: 30000
    pub llm_retry_max_ms: u64,

    /// Pause between two actions of the same batch.
    /// Default: 100
    pub wait_between_actions_ms: u64,

    /// Steps rendered into the history summary handed to the engine.
    /// Default: 10
    pub history_summary_steps: usize,

    pub final_actions: FinalActionsPolicy,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_actions_per_step: 3,
            max_consecutive_failures: 3,
            action_timeout_ms: 30_000,
            llm_timeout_ms: 60_000,
            snapshot_timeout_ms: 10_000,
            signal_settle_timeout_ms: 2_000,
            llm_max_attempts: 3,
            llm_retry_base_ms: 1_000,
            llm_retry_max_ms: 30_000,
            wait_between_actions_ms: 100,
            history_summary_steps: 10,
            final_actions: FinalActionsPolicy::OnDone,
        }
    }
}

impl AgentLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small limits and short timeouts, for tests.
    pub fn minimal() -> Self {
        Self {
            max_steps: 10,
            max_actions_per_step: 3,
            max_consecutive_failures: 3,
            action_timeout_ms: 2_000,
            llm_timeout_ms: 2_000,
            snapshot_timeout_ms: 1_000,
            signal_settle_timeout_ms: 1_000,
            llm_max_attempts: 3,
            llm_retry_base_ms: 1,
            llm_retry_max_ms: 10,
            wait_between_actions_ms: 0,
            history_summary_steps: 5,
            final_actions: FinalActionsPolicy::OnDone,
        }
    }

    /// Shorter timeouts and backoff for interactive use.
    pub fn fast() -> Self {
        Self {
            max_steps: 50,
            max_consecutive_failures: 2,
            action_timeout_ms: 15_000,
            llm_timeout_ms: 30_000,
            snapshot_timeout_ms: 5_000,
            llm_retry_base_ms: 500,
            llm_retry_max_ms: 5_000,
            wait_between_actions_ms: 50,
            ..Self::default()
        }
    }

    /// Builder: set max steps.
    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder: set max actions per step.
    pub fn actions_per_step(mut self, count: u32) -> Self {
        self.max_actions_per_step = count;
        self
    }

    pub fn max_failures(mut self, count: u32) -> Self {
        self.max_consecutive_failures = count;
        self
    }

    pub fn action_timeout(mut self, ms: u64) -> Self {
        self.action_timeout_ms = ms;
        self
    }

    /// Builder: set LLM timeout.
    pub fn llm_timeout(mut self, ms: u64) -> Self {
        self.llm_timeout_ms = ms;
        self
    }

    pub fn llm_retries(mut self, attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        self.llm_max_attempts = attempts;
        self.llm_retry_base_ms = base_ms;
        self.llm_retry_max_ms = max_ms;
        self
    }

    pub fn wait_between_actions(mut self, ms: u64) -> Self {
        self.wait_between_actions_ms = ms;
        self
    }

    pub fn final_actions(mut self, policy: FinalActionsPolicy) -> Self {
        self.final_actions = policy;
        self
    }

    pub fn action_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn snapshot_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn signal_settle_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.signal_settle_timeout_ms)
    }
}
