//! Agent Loop Controller: the observe-decide-validate-execute-record cycle.
//!
//! One [`Agent`] owns one run. Steps never overlap; watchdog signals are
//! drained at turn boundaries and raced against the two slow awaits of a
//! turn (the engine call and each dispatch) so a fatal signal ends the run
//! within the turn it arrives in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use action_registry::{ActionCall, ActionRegistry, ActionResult, BrowserPort, DispatchContext};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use watchdog::{EpochPublisher, SignalCategory, SignalReceiver, WatchdogSignal};
use webpilot_core_types::BrowserSnapshot;

use super::config::{AgentLoopConfig, FinalActionsPolicy};
use super::types::{AgentOutput, FailureReason, RunOutcome, RunState, Task};
use crate::engine::{call_with_retry, DecisionRequest, EngineError, ReasoningEngine, RetryPolicy};
use crate::errors::{AgentError, ErrorKind, StepError};
use crate::history::{AgentHistory, HistoryReader, StepOutcome, StepRecord};
use crate::metrics;

/// Result text recorded for the action a fatal signal interrupted.
pub const ABORTED_MESSAGE: &str = "aborted: environment lost";

/// Cloneable handle for requesting a cooperative stop from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Interrupted<T> {
    Fatal(WatchdogSignal),
    Finished(T),
}

async fn wait_fatal(signals: &mut Option<SignalReceiver>) -> WatchdogSignal {
    match signals {
        Some(receiver) => receiver.next_fatal().await,
        None => std::future::pending().await,
    }
}

/// A step being assembled during a turn.
struct StepDraft {
    started: Instant,
    timestamp: DateTime<Utc>,
    snapshot: BrowserSnapshot,
    advisories: Vec<WatchdogSignal>,
    model_output: Option<AgentOutput>,
    actions: Vec<ActionCall>,
    results: Vec<ActionResult>,
    error: Option<StepError>,
    fatal: Option<WatchdogSignal>,
    engine_failed: bool,
}

impl StepDraft {
    fn new(snapshot: BrowserSnapshot, advisories: Vec<WatchdogSignal>) -> Self {
        Self {
            started: Instant::now(),
            timestamp: Utc::now(),
            snapshot,
            advisories,
            model_output: None,
            actions: Vec::new(),
            results: Vec::new(),
            error: None,
            fatal: None,
            engine_failed: false,
        }
    }

    fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error = Some(StepError::new(kind, message));
    }

    /// Rejection or unusable output: the only result of the step.
    fn reject(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        self.results = vec![ActionResult::failure(message.clone())];
        self.fail(kind, message);
    }
}

/// Drives one task (and its follow-ups) to a terminal state.
pub struct Agent {
    config: AgentLoopConfig,
    registry: Arc<ActionRegistry>,
    engine: Arc<dyn ReasoningEngine>,
    browser: Arc<dyn BrowserPort>,
    signals: Option<SignalReceiver>,
    epochs: Option<EpochPublisher>,
    history: Arc<RwLock<AgentHistory>>,
    state: RunState,
    task: Option<Task>,
    task_index: usize,
    stop: CancellationToken,
    /// Engine turns used by the current task.
    budget_used: u32,
    consecutive_failures: u32,
    /// Advisories drained after the previous step, for the next snapshot.
    pending_advisories: Vec<WatchdogSignal>,
    /// Next turn retries the current logical step after a navigation timeout.
    retrying_navigation: bool,
    /// The turn in progress is such a retry.
    in_navigation_retry: bool,
    failure: Option<FailureReason>,
    run_error: Option<String>,
    final_actions_pending: bool,
    final_action_results: Vec<ActionResult>,
}

impl Agent {
    pub fn new(
        config: AgentLoopConfig,
        registry: Arc<ActionRegistry>,
        engine: Arc<dyn ReasoningEngine>,
        browser: Arc<dyn BrowserPort>,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            browser,
            signals: None,
            epochs: None,
            history: Arc::new(RwLock::new(AgentHistory::new())),
            state: RunState::Idle,
            task: None,
            task_index: 0,
            stop: CancellationToken::new(),
            budget_used: 0,
            consecutive_failures: 0,
            pending_advisories: Vec::new(),
            retrying_navigation: false,
            in_navigation_retry: false,
            failure: None,
            run_error: None,
            final_actions_pending: false,
            final_action_results: Vec::new(),
        }
    }

    /// Attach the signal channel and epoch publisher of a watchdog supervisor.
    pub fn with_signals(mut self, signals: SignalReceiver, epochs: EpochPublisher) -> Self {
        self.signals = Some(signals);
        self.epochs = Some(epochs);
        self
    }

    /// Continue an existing history, e.g. one loaded from disk.
    ///
    /// The agent is `Done` when the last step carries a terminal result,
    /// `Failed` when the last step recorded a fatal signal, `Idle` otherwise.
    pub fn with_history(mut self, history: AgentHistory) -> Self {
        self.state = match history.last() {
            Some(step) if step.fatal_signal.is_some() => {
                self.failure = Some(FailureReason::EnvironmentLost);
                RunState::Failed
            }
            Some(step) if step.has_terminal_result() => RunState::Done,
            _ => RunState::Idle,
        };
        self.task_index = history.tasks().len().saturating_sub(1);
        self.task = history.tasks().last().map(Task::new);
        self.history = Arc::new(RwLock::new(history));
        self
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    /// Extracted content of the last recorded result, or its error.
    pub fn final_result(&self) -> Option<String> {
        self.history.read().final_result()
    }

    pub fn history(&self) -> HistoryReader {
        HistoryReader::new(Arc::clone(&self.history))
    }

    /// Request a stop; observed at the top of the next turn.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// Start `task` and drive it to a terminal state.
    pub async fn start(&mut self, task: Task) -> Result<RunOutcome, AgentError> {
        if self.state != RunState::Idle {
            return Err(AgentError::invalid_state("start", self.state));
        }
        self.task_index = self.history.write().push_task(task.goal.clone());
        let initial_actions = task.initial_actions.clone();
        self.task = Some(task);
        self.state = RunState::Running;
        info!(goal = %self.current_goal(), "agent run started");

        if !initial_actions.is_empty() {
            self.run_initial_actions(initial_actions).await;
        }
        Ok(self.run().await)
    }

    /// Attach a follow-up task to a finished run. The history is kept and
    /// the step budget starts over; call [`run`](Self::run) to continue.
    pub fn add_follow_up_task(&mut self, goal: impl Into<String>) -> Result<(), AgentError> {
        if self.state != RunState::Done {
            return Err(AgentError::invalid_state("add a follow-up task", self.state));
        }
        let goal = goal.into();
        self.task_index = self.history.write().push_task(goal.clone());
        self.task = Some(Task::new(goal));
        self.budget_used = 0;
        self.consecutive_failures = 0;
        self.retrying_navigation = false;
        self.final_action_results.clear();
        if self.stop.is_cancelled() {
            self.stop = CancellationToken::new();
        }
        self.state = RunState::Running;
        info!(task = self.task_index, goal = %self.current_goal(), "follow-up task attached");
        Ok(())
    }

    /// Run turns until the state leaves `Running`.
    pub async fn run(&mut self) -> RunOutcome {
        while self.state == RunState::Running {
            if self.stop.is_cancelled() {
                info!(steps = self.budget_used, "stop requested");
                let reason = StepError::new(ErrorKind::CancellationRequested, "stop requested");
                self.finish(RunState::Stopped, None, Some(reason.to_string()));
                break;
            }
            self.turn().await;
        }
        if self.final_actions_pending {
            self.final_actions_pending = false;
            self.run_final_actions().await;
        }
        self.outcome()
    }

    /// User-facing summary of the current state.
    pub fn outcome(&self) -> RunOutcome {
        let history = self.history.read();
        let last = history.last_result();
        RunOutcome {
            state: self.state,
            failure: self.failure,
            final_content: last.and_then(|result| result.extracted_content.clone()),
            error: last
                .and_then(|result| result.error.clone())
                .or_else(|| self.run_error.clone()),
            steps: history.len(),
            final_action_results: self.final_action_results.clone(),
        }
    }

    fn current_goal(&self) -> String {
        self.task
            .as_ref()
            .map(|task| task.goal.clone())
            .unwrap_or_default()
    }

    fn finish(&mut self, state: RunState, failure: Option<FailureReason>, message: Option<String>) {
        self.state = state;
        self.failure = failure;
        self.run_error = message;
        self.final_actions_pending = state != RunState::Stopped;
        metrics::record_run(state.as_str());
        match failure {
            Some(reason) => warn!(
                state = state.as_str(),
                reason = reason.kind().as_str(),
                error = self.run_error.as_deref().unwrap_or_default(),
                "agent run ended"
            ),
            None => info!(state = state.as_str(), "agent run ended"),
        }
    }

    fn advance_epoch(&mut self) {
        self.in_navigation_retry = std::mem::take(&mut self.retrying_navigation);
        if self.in_navigation_retry {
            debug!("retrying the current step after a navigation timeout");
            return;
        }
        if let Some(epochs) = &self.epochs {
            epochs.advance();
        }
    }

    /// Drain at a turn boundary. Advisories accumulate for the next snapshot.
    fn drain_signals(&mut self) -> Option<WatchdogSignal> {
        let drain = match self.signals.as_mut() {
            Some(signals) => signals.drain(),
            None => return None,
        };
        self.pending_advisories.extend(drain.advisories);
        if drain.fatal.is_some() {
            self.pending_advisories.clear();
        }
        drain.fatal
    }

    async fn observe(&self) -> Result<BrowserSnapshot, String> {
        let timeout = self.config.snapshot_timeout_duration();
        match tokio::time::timeout(timeout, self.browser.snapshot()).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(err)) => Err(format!("snapshot failed: {err}")),
            Err(_) => Err(format!("snapshot timed out after {}ms", timeout.as_millis())),
        }
    }

    /// Take the snapshot for a new step and merge pending advisories.
    async fn open_step(&mut self) -> StepDraft {
        let advisories = std::mem::take(&mut self.pending_advisories);
        let mut draft = match self.observe().await {
            Ok(snapshot) => StepDraft::new(snapshot, advisories),
            Err(message) => {
                let fallback = self
                    .history
                    .read()
                    .last()
                    .map(|step| step.snapshot.clone())
                    .unwrap_or_default();
                let mut draft = StepDraft::new(fallback, advisories);
                draft.fail(ErrorKind::ActionExecution, message);
                return draft;
            }
        };
        for signal in &draft.advisories {
            signal.merge_into(&mut draft.snapshot);
        }
        draft
    }

    #[instrument(skip_all, fields(task = self.task_index, initial = true))]
    async fn run_initial_actions(&mut self, actions: Vec<ActionCall>) {
        self.advance_epoch();
        if let Some(fatal) = self.drain_signals() {
            self.close_with_fatal(fatal);
            return;
        }
        let mut draft = self.open_step().await;
        if draft.error.is_none() {
            draft.actions = actions;
            self.validate_and_execute(&mut draft).await;
        }
        self.settle(&mut draft).await;
        self.record(draft);
    }

    /// One engine turn.
    #[instrument(skip_all, fields(task = self.task_index, step = self.budget_used + 1))]
    async fn turn(&mut self) {
        self.advance_epoch();
        if let Some(fatal) = self.drain_signals() {
            self.close_with_fatal(fatal);
            return;
        }
        self.budget_used += 1;

        let mut draft = self.open_step().await;
        if draft.error.is_none() {
            self.decide(&mut draft).await;
        }
        if draft.error.is_none() && draft.fatal.is_none() {
            self.validate_and_execute(&mut draft).await;
        }
        self.settle(&mut draft).await;
        self.record(draft);
    }

    /// Fatal signal found at a turn boundary: record an error-terminal step
    /// without touching the browser.
    fn close_with_fatal(&mut self, fatal: WatchdogSignal) {
        let snapshot = self
            .history
            .read()
            .last()
            .map(|step| step.snapshot.clone())
            .unwrap_or_default();
        let mut draft = StepDraft::new(snapshot, Vec::new());
        draft.fatal = Some(fatal);
        self.record(draft);
    }

    async fn decide(&mut self, draft: &mut StepDraft) {
        let request = {
            let history = self.history.read();
            DecisionRequest {
                task: self.current_goal(),
                previous_tasks: history.tasks()[..self.task_index.min(history.tasks().len())].to_vec(),
                step: self.budget_used,
                history_summary: history.summary(self.config.history_summary_steps),
                snapshot: draft.snapshot.clone(),
                notices: draft.advisories.iter().map(WatchdogSignal::describe).collect(),
                actions: self.registry.specification_for(&draft.snapshot),
                max_actions: self.config.max_actions_per_step as usize,
            }
        };
        let policy = RetryPolicy::from_config(&self.config);

        let decision = tokio::select! {
            biased;
            fatal = wait_fatal(&mut self.signals) => Interrupted::Fatal(fatal),
            result = call_with_retry(self.engine.as_ref(), &request, &policy) => Interrupted::Finished(result),
        };

        match decision {
            Interrupted::Fatal(fatal) => {
                warn!(category = %fatal.category(), "fatal signal while waiting for the engine");
                draft.fatal = Some(fatal);
            }
            Interrupted::Finished(Ok(mut output)) => {
                let limit = self.config.max_actions_per_step.max(1) as usize;
                if output.actions.len() > limit {
                    warn!(proposed = output.actions.len(), limit, "truncating proposed batch");
                    output.actions.truncate(limit);
                }
                debug!(next_goal = %output.next_goal, actions = output.actions.len(), "engine proposed batch");
                draft.actions = output.actions.clone();
                draft.model_output = Some(output);
            }
            Interrupted::Finished(Err(EngineError::InvalidOutput(message))) => {
                warn!(error = %message, "engine output rejected");
                draft.reject(ErrorKind::Validation, format!("invalid model output: {message}"));
            }
            Interrupted::Finished(Err(err)) => {
                let kind = if err.is_transient() {
                    ErrorKind::TransientEngine
                } else {
                    ErrorKind::EngineFailure
                };
                error!(engine = self.engine.name(), error = %err, "engine unavailable");
                draft.fail(kind, err.to_string());
                draft.engine_failed = true;
            }
        }
    }

    /// Validate the whole batch, then execute it with short-circuiting.
    async fn validate_and_execute(&mut self, draft: &mut StepDraft) {
        if draft.actions.is_empty() {
            draft.reject(ErrorKind::Validation, "no actions proposed");
            return;
        }
        if let Err(rejection) = self.registry.validate_batch(&draft.actions, &draft.snapshot) {
            warn!(index = rejection.index, error = %rejection.error, "batch rejected");
            draft.reject(ErrorKind::Validation, rejection.to_string());
            return;
        }

        let cx = DispatchContext::new(
            Arc::clone(&self.browser),
            Arc::new(draft.snapshot.clone()),
            self.config.action_timeout_duration(),
        );
        let pause = Duration::from_millis(self.config.wait_between_actions_ms);
        let actions = draft.actions.clone();

        for (position, call) in actions.iter().enumerate() {
            if position > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let dispatched = tokio::select! {
                biased;
                fatal = wait_fatal(&mut self.signals) => Interrupted::Fatal(fatal),
                result = self.registry.dispatch(call, &cx) => Interrupted::Finished(result),
            };
            match dispatched {
                Interrupted::Fatal(fatal) => {
                    warn!(action = %call.name, category = %fatal.category(), "fatal signal aborted the batch");
                    draft.results.push(ActionResult::failure(ABORTED_MESSAGE));
                    draft.fatal = Some(fatal);
                    break;
                }
                Interrupted::Finished(Ok(result)) => {
                    let stop = result.stops_batch();
                    if result.is_failure() {
                        draft.fail(
                            ErrorKind::ActionExecution,
                            result.error.clone().unwrap_or_else(|| format!("{} failed", call.name)),
                        );
                    }
                    draft.results.push(result);
                    if stop {
                        break;
                    }
                }
                Interrupted::Finished(Err(err)) => {
                    draft.results.push(ActionResult::failure(err.to_string()));
                    draft.fail(ErrorKind::Validation, err.to_string());
                    break;
                }
            }
        }
    }

    /// End-of-turn drain: wait until every observer has handled the events
    /// published during the turn, then pick up a fatal signal the batch may
    /// have caused.
    async fn settle(&mut self, draft: &mut StepDraft) {
        let limit = self.config.signal_settle_timeout_duration();
        match self.signals.as_mut() {
            Some(signals) => {
                if !signals.settle(limit).await {
                    warn!(timeout_ms = limit.as_millis() as u64, "observers did not catch up before the drain");
                }
            }
            None => return,
        }
        if let Some(fatal) = self.drain_signals() {
            draft.fatal.get_or_insert(fatal);
        }
    }

    /// Append the step and evaluate the transitions.
    fn record(&mut self, draft: StepDraft) {
        let navigation_retry = draft.fatal.is_none()
            && self.pending_advisories.iter().any(|signal| {
                signal.category() == SignalCategory::NavigationTimeout
            });

        let outcome = if draft.fatal.is_some() {
            StepOutcome::Error
        } else if draft.results.iter().any(|result| result.is_done) {
            StepOutcome::Done
        } else if draft.error.is_some() || draft.results.iter().any(ActionResult::is_failure) {
            StepOutcome::Error
        } else {
            StepOutcome::Continue
        };
        let engine_failed = draft.engine_failed;
        let mut error = draft.error;
        if let Some(fatal) = &draft.fatal {
            error = Some(StepError::new(ErrorKind::EnvironmentLost, fatal.describe()));
        }

        let record = {
            let history = self.history.read();
            StepRecord {
                sequence: history.next_sequence(),
                task_index: self.task_index,
                timestamp: draft.timestamp,
                snapshot: draft.snapshot,
                advisories: draft.advisories,
                model_output: draft.model_output,
                actions: draft.actions,
                results: draft.results,
                outcome,
                error,
                fatal_signal: draft.fatal,
                duration_ms: draft.started.elapsed().as_millis() as u64,
            }
        };
        let sequence = record.sequence;
        let failed = record.has_failure();
        let terminal = record.has_terminal_result();
        let fatal = record.fatal_signal.clone();
        let step_error = record.error.clone();

        let appended = self.history.write().append(record);
        if let Err(err) = appended {
            error!(sequence, error = %err, "step rejected by history");
            self.finish(RunState::Failed, None, Some(err.to_string()));
            return;
        }
        metrics::record_step(match outcome {
            StepOutcome::Continue => "continue",
            StepOutcome::Done => "done",
            StepOutcome::Error => "error",
        });
        debug!(sequence, outcome = ?outcome, "step recorded");

        if navigation_retry && !self.in_navigation_retry {
            self.retrying_navigation = true;
        } else if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }

        if let Some(fatal) = fatal {
            self.retrying_navigation = false;
            self.finish(
                RunState::Failed,
                Some(FailureReason::EnvironmentLost),
                Some(format!("environment lost: {}", fatal.describe())),
            );
        } else if terminal {
            self.finish(RunState::Done, None, None);
        } else if engine_failed {
            self.finish(
                RunState::Failed,
                Some(FailureReason::EngineUnavailable),
                step_error.map(|err| err.to_string()),
            );
        } else if self.budget_used >= self.config.max_steps {
            self.finish(
                RunState::Failed,
                Some(FailureReason::StepLimitExceeded),
                Some(format!("step limit of {} reached", self.config.max_steps)),
            );
        } else if self.config.max_consecutive_failures > 0
            && self.consecutive_failures >= self.config.max_consecutive_failures
        {
            self.finish(
                RunState::Failed,
                Some(FailureReason::TooManyFailures),
                Some(format!("{} consecutive failed steps", self.consecutive_failures)),
            );
        }
    }

    /// Run the task's final actions if the policy admits the terminal state.
    /// Results go to the outcome, never to the history.
    async fn run_final_actions(&mut self) {
        let actions = match &self.task {
            Some(task) if !task.final_actions.is_empty() => task.final_actions.clone(),
            _ => return,
        };
        let allowed = match self.config.final_actions {
            FinalActionsPolicy::OnDone => self.state == RunState::Done,
            FinalActionsPolicy::OnDoneOrFailed => {
                matches!(self.state, RunState::Done | RunState::Failed)
            }
            FinalActionsPolicy::Never => false,
        };
        if !allowed {
            debug!(state = self.state.as_str(), policy = ?self.config.final_actions, "skipping final actions");
            return;
        }

        let snapshot = match self.observe().await {
            Ok(snapshot) => snapshot,
            Err(message) => {
                self.final_action_results.push(ActionResult::failure(message));
                return;
            }
        };
        let cx = DispatchContext::new(
            Arc::clone(&self.browser),
            Arc::new(snapshot),
            self.config.action_timeout_duration(),
        );
        for call in &actions {
            let result = match self.registry.dispatch(call, &cx).await {
                Ok(result) => result,
                Err(err) => ActionResult::failure(err.to_string()),
            };
            let stop = result.stops_batch();
            self.final_action_results.push(result);
            if stop {
                break;
            }
        }
        info!(count = self.final_action_results.len(), "final actions finished");
    }
}
