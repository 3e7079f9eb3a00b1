use std::collections::VecDeque;
use std::time::Duration;

use action_registry::ActionSpec;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use webpilot_core_types::BrowserSnapshot;

use crate::agent_loop::{AgentLoopConfig, AgentOutput};
use crate::metrics;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("transient engine error: {0}")]
    Transient(String),
    #[error("engine call timed out after {0}ms")]
    Timeout(u64),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
    #[error("engine failure: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. } | EngineError::Transient(_) | EngineError::Timeout(_)
        )
    }
}

/// Everything the engine sees for one decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub task: String,
    /// Goals of earlier tasks on the same history.
    pub previous_tasks: Vec<String>,
    pub step: u32,
    pub history_summary: String,
    pub snapshot: BrowserSnapshot,
    /// Advisory watchdog notices merged since the previous turn.
    pub notices: Vec<String>,
    /// Actions offered in the current state.
    pub actions: Vec<ActionSpec>,
    pub max_actions: usize,
}

impl DecisionRequest {
    /// Plain text rendering for text-completion backends.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Task: {}\n", self.task));
        for (index, goal) in self.previous_tasks.iter().enumerate() {
            out.push_str(&format!("Earlier task {}: {goal}\n", index + 1));
        }
        out.push_str(&format!("Step: {}\n\n", self.step));
        if !self.history_summary.is_empty() {
            out.push_str("History:\n");
            out.push_str(&self.history_summary);
            out.push_str("\n\n");
        }
        out.push_str(&format!("Current URL: {}\n", self.snapshot.url));
        if let Some(title) = &self.snapshot.title {
            out.push_str(&format!("Title: {title}\n"));
        }
        if self.snapshot.tabs.len() > 1 {
            for tab in &self.snapshot.tabs {
                out.push_str(&format!("Tab {}: {}\n", tab.page, tab.url));
            }
        }
        if let Some(dialog) = &self.snapshot.dialog {
            out.push_str(&format!("Open dialog ({:?}): {}\n", dialog.kind, dialog.message));
        }
        for download in &self.snapshot.downloads {
            out.push_str(&format!("Downloaded: {download}\n"));
        }
        for notice in &self.notices {
            out.push_str(&format!("Notice: {notice}\n"));
        }
        out.push_str("\nInteractive elements:\n");
        out.push_str(&self.snapshot.element_tree());
        out.push_str(&format!(
            "\n\nAvailable actions (at most {} per step):\n",
            self.max_actions
        ));
        for spec in &self.actions {
            out.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        out
    }
}

/// Decision backend consulted once per turn.
///
/// Implementations must be safe to call again with the same request: the
/// loop retries transient failures and nothing touches the browser before
/// the output has been validated.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str {
        "engine"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<AgentOutput, EngineError>;
}

/// Timeout and backoff applied around every engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AgentLoopConfig) -> Self {
        Self {
            max_attempts: config.llm_max_attempts.max(1),
            base_delay: Duration::from_millis(config.llm_retry_base_ms),
            max_delay: Duration::from_millis(config.llm_retry_max_ms),
            timeout: Duration::from_millis(config.llm_timeout_ms),
        }
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped,
    /// but never shorter than the server's retry hint.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after {
            Some(hint) => exponential.max(hint.min(self.max_delay)),
            None => exponential,
        }
    }
}

/// Call the engine with a per-attempt timeout, retrying transient errors with
/// bounded exponential backoff.
pub async fn call_with_retry(
    engine: &dyn ReasoningEngine,
    request: &DecisionRequest,
    policy: &RetryPolicy,
) -> Result<AgentOutput, EngineError> {
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, engine.decide(request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(policy.timeout.as_millis() as u64)),
        };
        match result {
            Ok(output) => return Ok(output),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let hint = match &err {
                    EngineError::RateLimited { retry_after_ms } => {
                        retry_after_ms.map(Duration::from_millis)
                    }
                    _ => None,
                };
                let delay = policy.backoff(attempt, hint);
                warn!(
                    engine = engine.name(),
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "engine call failed, retrying"
                );
                metrics::record_engine_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(engine = engine.name(), attempts = attempt + 1, error = %err, "engine call gave up");
                return Err(err);
            }
        }
    }
}

/// Deterministic engine replaying a fixed script of turns.
///
/// Once the script runs out the fallback output is repeated; without one the
/// engine reports a fatal error.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<AgentOutput, EngineError>>>,
    fallback: Option<AgentOutput>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = Result<AgentOutput, EngineError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Engine answering every turn with the same output.
    pub fn repeating(output: AgentOutput) -> Self {
        Self::new(Vec::new()).with_fallback(output)
    }

    pub fn with_fallback(mut self, output: AgentOutput) -> Self {
        self.fallback = Some(output);
        self
    }

    /// Requests received so far, in call order (retries included).
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<AgentOutput, EngineError> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(turn) => turn,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| EngineError::Fatal("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_registry::ActionCall;

    fn request() -> DecisionRequest {
        DecisionRequest {
            task: "find the changelog".into(),
            previous_tasks: Vec::new(),
            step: 1,
            history_summary: String::new(),
            snapshot: BrowserSnapshot::new("https://example.com"),
            notices: vec!["new tab p2 opened: https://ads.example.com".into()],
            actions: Vec::new(),
            max_actions: 3,
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0, None), Duration::from_millis(100));
        assert_eq!(policy.backoff(2, None), Duration::from_millis(400));
        assert_eq!(policy.backoff(8, None), Duration::from_millis(1_000));
        assert_eq!(
            policy.backoff(0, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::RateLimited {
                retry_after_ms: Some(1),
            }),
            Err(EngineError::Transient("connection reset".into())),
            Ok(AgentOutput::new(vec![ActionCall::bare("go_back")])),
        ]);
        let output = call_with_retry(&engine, &request(), &policy(3)).await.unwrap();
        assert_eq!(output.actions[0].name, "go_back");
        assert_eq!(engine.requests().len(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::Transient("503".into())),
            Err(EngineError::Transient("503".into())),
            Ok(AgentOutput::default()),
        ]);
        let err = call_with_retry(&engine, &request(), &policy(2)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(engine.remaining(), 1);
    }

    #[tokio::test]
    async fn fatal_and_invalid_output_are_not_retried() {
        let engine = ScriptedEngine::new(vec![Err(EngineError::InvalidOutput("not json".into()))]);
        let err = call_with_retry(&engine, &request(), &policy(3)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutput(_)));
        assert_eq!(engine.requests().len(), 1);

        let exhausted = ScriptedEngine::new(Vec::new());
        let err = call_with_retry(&exhausted, &request(), &policy(3)).await.unwrap_err();
        assert!(matches!(err, EngineError::Fatal(_)));
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningEngine for Stalled {
        async fn decide(&self, _request: &DecisionRequest) -> Result<AgentOutput, EngineError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(AgentOutput::default())
        }
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let mut policy = policy(2);
        policy.timeout = Duration::from_millis(20);
        let err = call_with_retry(&Stalled, &request(), &policy).await.unwrap_err();
        assert_eq!(err, EngineError::Timeout(20));
    }

    #[test]
    fn render_includes_state_and_notices() {
        let text = request().render();
        assert!(text.contains("Task: find the changelog"));
        assert!(text.contains("Notice: new tab p2"));
        assert!(text.contains("at most 3 per step"));
    }
}
