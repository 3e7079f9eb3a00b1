//! History Store: the append-only record of a run.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use action_registry::{ActionCall, ActionResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use watchdog::WatchdogSignal;
use webpilot_core_types::BrowserSnapshot;

use crate::agent_loop::AgentOutput;
use crate::errors::StepError;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("step {got} out of order, expected {expected}")]
    OutOfOrder { expected: u32, got: u32 },
    #[error("step {sequence} appended after a terminal result")]
    AfterTerminal { sequence: u32 },
    #[error("step {sequence} has results past a failed or terminal result")]
    ShortCircuit { sequence: u32 },
    #[error("step {sequence} refers to unknown task {task_index}")]
    UnknownTask { sequence: u32, task_index: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Continue,
    Done,
    Error,
}

/// One turn of the loop. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based, contiguous across the whole history.
    pub sequence: u32,
    /// Index into [`AgentHistory::tasks`].
    pub task_index: usize,
    pub timestamp: DateTime<Utc>,
    /// State presented to the engine, advisories merged in.
    pub snapshot: BrowserSnapshot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<WatchdogSignal>,
    /// `None` for steps that ran without the engine (initial actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<AgentOutput>,
    /// Batch as proposed, after truncation.
    #[serde(default)]
    pub actions: Vec<ActionCall>,
    #[serde(default)]
    pub results: Vec<ActionResult>,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Fatal signal that ended the run during this step. Results are then
    /// advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_signal: Option<WatchdogSignal>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn has_terminal_result(&self) -> bool {
        self.results.iter().any(|result| result.is_done)
    }

    pub fn has_failure(&self) -> bool {
        self.error.is_some() || self.results.iter().any(ActionResult::is_failure)
    }

    fn short_circuit_holds(&self) -> bool {
        let stops = self.results.iter().position(ActionResult::stops_batch);
        if let Some(stop) = stops {
            if stop + 1 != self.results.len() {
                return false;
            }
        }
        if self.model_output.is_none() && self.actions.is_empty() {
            return true;
        }
        if self.results.len() > self.actions.len().max(1) {
            return false;
        }
        if self.results.len() < self.actions.len() {
            return stops.is_some();
        }
        true
    }
}

/// Ordered steps of one agent, across follow-up tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory {
    tasks: Vec<String>,
    steps: Vec<StepRecord>,
}

impl AgentHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_task(&mut self, goal: impl Into<String>) -> usize {
        self.tasks.push(goal.into());
        self.tasks.len() - 1
    }

    pub fn next_sequence(&self) -> u32 {
        self.steps.last().map_or(1, |step| step.sequence + 1)
    }

    /// Append a step, enforcing the history invariants.
    pub fn append(&mut self, step: StepRecord) -> Result<(), HistoryError> {
        let expected = self.next_sequence();
        if step.sequence != expected {
            return Err(HistoryError::OutOfOrder {
                expected,
                got: step.sequence,
            });
        }
        if step.task_index >= self.tasks.len() {
            return Err(HistoryError::UnknownTask {
                sequence: step.sequence,
                task_index: step.task_index,
            });
        }
        if self.task_finished(step.task_index) {
            return Err(HistoryError::AfterTerminal {
                sequence: step.sequence,
            });
        }
        if !step.short_circuit_holds() {
            return Err(HistoryError::ShortCircuit {
                sequence: step.sequence,
            });
        }
        self.steps.push(step);
        Ok(())
    }

    fn task_finished(&self, task_index: usize) -> bool {
        self.steps
            .iter()
            .any(|step| step.task_index == task_index && step.has_terminal_result())
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    /// Last recorded result.
    pub fn last_result(&self) -> Option<&ActionResult> {
        self.steps.iter().rev().find_map(|step| step.results.last())
    }

    /// Content of the last result, or its error.
    pub fn final_result(&self) -> Option<String> {
        let last = self.last_result()?;
        last.extracted_content.clone().or_else(|| last.error.clone())
    }

    /// True when the latest task produced a terminal result and no fatal
    /// signal ended it.
    pub fn is_done(&self) -> bool {
        self.last()
            .is_some_and(|step| step.fatal_signal.is_none() && step.has_terminal_result())
    }

    pub fn is_successful(&self) -> Option<bool> {
        self.is_done()
            .then(|| self.last_result().is_some_and(|result| result.success))
    }

    /// Step errors and failed results, with their step sequence.
    pub fn errors(&self) -> Vec<(u32, String)> {
        let mut errors = Vec::new();
        for step in &self.steps {
            if let Some(error) = &step.error {
                errors.push((step.sequence, error.to_string()));
            }
            for result in &step.results {
                if let Some(message) = &result.error {
                    errors.push((step.sequence, message.clone()));
                }
            }
        }
        errors
    }

    pub fn urls(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.snapshot.url.clone()).collect()
    }

    pub fn extracted_content(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|step| step.results.iter())
            .filter_map(|result| result.extracted_content.clone())
            .collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|step| step.actions.iter().map(|call| call.name.clone()))
            .collect()
    }

    /// Text digest of the last `max_steps` steps for the engine prompt.
    pub fn summary(&self, max_steps: usize) -> String {
        let skip = self.steps.len().saturating_sub(max_steps);
        let mut lines = Vec::new();
        if skip > 0 {
            lines.push(format!("({skip} earlier steps omitted)"));
        }
        for step in self.steps.iter().skip(skip) {
            let goal = step
                .model_output
                .as_ref()
                .map(|output| output.next_goal.as_str())
                .filter(|goal| !goal.is_empty())
                .unwrap_or("-");
            let actions = step
                .actions
                .iter()
                .map(|call| call.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Step {} [{goal}] actions: {actions}", step.sequence));
            if let Some(memory) = step.model_output.as_ref().and_then(|o| o.memory.as_deref()) {
                lines.push(format!("  memory: {memory}"));
            }
            for result in &step.results {
                if let Some(error) = &result.error {
                    lines.push(format!("  error: {error}"));
                } else if result.include_in_memory {
                    if let Some(content) = &result.extracted_content {
                        lines.push(format!("  result: {content}"));
                    }
                }
            }
            if let Some(error) = &step.error {
                if step.results.is_empty() {
                    lines.push(format!("  error: {error}"));
                }
            }
            for signal in &step.advisories {
                lines.push(format!("  notice: {}", signal.describe()));
            }
        }
        lines.join("\n")
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a persisted history. Steps are re-appended so a file that breaks
    /// the invariants is rejected.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let raw = fs::read_to_string(path)?;
        let stored: AgentHistory = serde_json::from_str(&raw)?;
        let mut history = AgentHistory {
            tasks: stored.tasks,
            steps: Vec::with_capacity(stored.steps.len()),
        };
        for step in stored.steps {
            history.append(step)?;
        }
        Ok(history)
    }
}

/// Shared read-only view of a history owned by an agent.
#[derive(Debug, Clone)]
pub struct HistoryReader {
    inner: Arc<RwLock<AgentHistory>>,
}

impl HistoryReader {
    pub(crate) fn new(inner: Arc<RwLock<AgentHistory>>) -> Self {
        Self { inner }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Owned copy of the history at this point.
    pub fn snapshot(&self) -> AgentHistory {
        self.inner.read().clone()
    }

    pub fn last(&self) -> Option<StepRecord> {
        self.inner.read().last().cloned()
    }

    /// Run `f` against the history without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&AgentHistory) -> R) -> R {
        f(&self.inner.read())
    }
}
