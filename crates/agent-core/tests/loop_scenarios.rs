use std::sync::Arc;
use std::time::Duration;

use action_registry::{ActionCall, ActionRegistry};
use agent_core::{
    Agent, AgentError, AgentLoopConfig, AgentOutput, EngineError, ErrorKind, FailureReason,
    MockBrowser, RunState, ScriptedEngine, StepOutcome, Task,
};
use serde_json::json;
use watchdog::{WatchdogConfig, WatchdogSupervisor};
use webpilot_core_types::{BrowserEvent, PageId};

fn registry() -> Arc<ActionRegistry> {
    Arc::new(ActionRegistry::with_browser_actions().unwrap())
}

fn navigate(url: &str) -> ActionCall {
    ActionCall::new("navigate", json!({ "url": url }))
}

fn click(index: u32) -> ActionCall {
    ActionCall::new("click", json!({ "index": index }))
}

fn scroll() -> ActionCall {
    ActionCall::new("scroll", json!({ "down": true }))
}

fn done(text: &str) -> ActionCall {
    ActionCall::new("done", json!({ "text": text }))
}

fn turn(actions: Vec<ActionCall>) -> Result<AgentOutput, EngineError> {
    Ok(AgentOutput::new(actions))
}

fn crash() -> BrowserEvent {
    BrowserEvent::TargetCrashed {
        page: PageId::from("page-1"),
        reason: "renderer gone".into(),
    }
}

fn agent(config: AgentLoopConfig, engine: Arc<ScriptedEngine>, browser: Arc<MockBrowser>) -> Agent {
    Agent::new(config, registry(), engine, browser)
}

#[tokio::test]
async fn failed_click_short_circuits_the_batch_and_the_run_continues() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![navigate("https://example.com/shop"), click(3), scroll()]),
        turn(vec![done("gave up on the button")]),
    ]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser.clone());

    let outcome = agent.start(Task::new("buy the widget")).await.unwrap();
    assert_eq!(outcome.state, RunState::Done);

    let history = agent.history().snapshot();
    let first = &history.steps()[0];
    assert_eq!(first.actions.len(), 3);
    assert_eq!(first.results.len(), 2);
    assert_eq!(first.results.iter().filter(|r| r.is_failure()).count(), 1);
    assert!(first.results[1].is_failure());
    assert_eq!(first.outcome, StepOutcome::Error);
    assert_eq!(first.error.as_ref().unwrap().kind, ErrorKind::ActionExecution);
    assert!(!browser.calls().iter().any(|call| call.starts_with("scroll")));
    assert_eq!(browser.outstanding_frames(), 0);
}

#[tokio::test]
async fn unknown_action_is_recorded_as_validation_failure_without_browser_calls() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![navigate("https://example.com/a"), ActionCall::bare("teleport")]),
        turn(vec![done("ok")]),
    ]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine.clone(), browser.clone());

    agent.start(Task::new("go somewhere")).await.unwrap();

    let step = agent.history().snapshot().steps()[0].clone();
    assert_eq!(step.results.len(), 1);
    assert!(step.results[0].is_failure());
    assert!(step.results[0].error.as_ref().unwrap().contains("teleport"));
    assert_eq!(step.error.unwrap().kind, ErrorKind::Validation);
    assert!(browser.calls().is_empty());
    assert_eq!(browser.frames_acquired(), 1, "only the final done dispatch acquires a frame");

    let second = &engine.requests()[1];
    assert!(second.history_summary.contains("teleport"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crash_during_a_successful_turn_fails_the_run_in_that_turn() {
    let browser = MockBrowser::new("https://example.com");
    let (_supervisor, signals, epochs) =
        WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
    browser.emit_on("scroll", crash());
    let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![
        navigate("https://example.com/feed"),
        scroll(),
    ])));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser).with_signals(signals, epochs);

    let outcome = agent.start(Task::new("read the feed")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::EnvironmentLost));
    let history = agent.history().snapshot();
    assert_eq!(history.len(), 1);
    let step = &history.steps()[0];
    assert!(step.results.iter().all(|result| result.success));
    assert!(step.fatal_signal.is_some());
    assert_eq!(step.error.as_ref().unwrap().kind, ErrorKind::EnvironmentLost);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crash_from_the_last_action_never_slips_into_the_next_turn() {
    for attempt in 0..20 {
        let browser = MockBrowser::new("https://example.com");
        let (supervisor, signals, epochs) =
            WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
        browser.emit_on("scroll", crash());
        let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![scroll()])));
        let mut agent =
            agent(AgentLoopConfig::minimal(), engine, browser).with_signals(signals, epochs);

        let outcome = agent.start(Task::new("scroll once")).await.unwrap();

        assert_eq!(outcome.state, RunState::Failed, "attempt {attempt}");
        assert_eq!(outcome.steps, 1, "attempt {attempt}");
        let step = agent.history().snapshot().steps()[0].clone();
        assert!(step.results[0].success, "attempt {attempt}");
        assert!(step.fatal_signal.is_some(), "attempt {attempt}");
        supervisor.detach().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fatal_signal_takes_precedence_over_a_terminal_result() {
    let browser = MockBrowser::new("https://example.com");
    let (_supervisor, signals, epochs) =
        WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
    browser.emit_on("acquire_frame", crash());
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![done("finished")])]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser).with_signals(signals, epochs);

    let outcome = agent.start(Task::new("finish quickly")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::EnvironmentLost));
    assert!(!agent.is_done());
    assert!(agent.history().snapshot().steps()[0].has_terminal_result());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fatal_signal_aborts_the_action_in_flight() {
    let browser = MockBrowser::new("https://example.com");
    browser.add_element("button", "Load more");
    let (_supervisor, signals, epochs) =
        WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
    browser.emit_on("click", crash());
    browser.delay("click", Duration::from_millis(500));
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![
        navigate("https://example.com/list"),
        click(0),
        scroll(),
    ])]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser.clone()).with_signals(signals, epochs);

    let outcome = agent.start(Task::new("load everything")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    let step = agent.history().snapshot().steps()[0].clone();
    assert_eq!(step.results.len(), 2);
    assert!(step.results[0].success);
    assert_eq!(step.results[1].error.as_deref(), Some(agent_core::agent_loop::ABORTED_MESSAGE));
    assert!(!browser.calls().iter().any(|call| call.starts_with("scroll")));
    assert_eq!(browser.outstanding_frames(), 0);
}

#[tokio::test]
async fn step_limit_fails_the_run_exactly_at_the_limit() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![scroll()])));
    let config = AgentLoopConfig::minimal().max_steps(10);
    let mut agent = agent(config, engine.clone(), browser);

    let outcome = agent.start(Task::new("scroll forever")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::StepLimitExceeded));
    assert_eq!(outcome.steps, 10);
    assert_eq!(engine.requests().len(), 10);
    let sequences: Vec<u32> = agent
        .history()
        .snapshot()
        .steps()
        .iter()
        .map(|step| step.sequence)
        .collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn oversized_batches_are_truncated_before_validation() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![
        scroll(),
        done("short"),
        ActionCall::bare("teleport"),
    ])]));
    let config = AgentLoopConfig::minimal().actions_per_step(2);
    let mut agent = agent(config, engine, browser);

    let outcome = agent.start(Task::new("be brief")).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.final_content.as_deref(), Some("short"));
    let step = agent.history().snapshot().steps()[0].clone();
    assert_eq!(step.actions.len(), 2);
    assert_eq!(step.results.len(), 2);
}

#[tokio::test]
async fn invalid_model_output_is_recorded_and_the_engine_retries_next_turn() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        Err(EngineError::InvalidOutput("expected an object".into())),
        turn(vec![]),
        turn(vec![done("ok")]),
    ]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser);

    let outcome = agent.start(Task::new("recover")).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    let history = agent.history().snapshot();
    assert_eq!(history.len(), 3);
    for step in &history.steps()[..2] {
        assert_eq!(step.results.len(), 1);
        assert_eq!(step.error.as_ref().unwrap().kind, ErrorKind::Validation);
    }
}

#[tokio::test]
async fn exhausted_engine_retries_fail_the_run() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        Err(EngineError::RateLimited { retry_after_ms: None }),
        Err(EngineError::Transient("connection reset".into())),
        Err(EngineError::Transient("connection reset".into())),
        turn(vec![done("never reached")]),
    ]));
    let config = AgentLoopConfig::minimal().llm_retries(3, 1, 5);
    let mut agent = agent(config, engine.clone(), browser.clone());

    let outcome = agent.start(Task::new("ask the model")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::EngineUnavailable));
    assert_eq!(engine.remaining(), 1);
    let step = agent.history().last().unwrap();
    assert_eq!(step.error.unwrap().kind, ErrorKind::TransientEngine);
    assert!(browser.calls().is_empty());
}

#[tokio::test]
async fn consecutive_failures_are_capped() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![click(42)])));
    let config = AgentLoopConfig::minimal().max_failures(3);
    let mut agent = agent(config, engine, browser);

    let outcome = agent.start(Task::new("click the ghost")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::TooManyFailures));
    assert_eq!(outcome.steps, 3);
    assert!(outcome.error.unwrap().contains("element 42 not found"));
}

#[tokio::test]
async fn start_is_rejected_once_running_or_finished() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![done("ok")])]));
    let mut agent = agent(AgentLoopConfig::minimal(), engine, browser);

    assert!(matches!(
        agent.add_follow_up_task("too early"),
        Err(AgentError::InvalidState { state: RunState::Idle, .. })
    ));
    agent.start(Task::new("first")).await.unwrap();
    assert!(matches!(
        agent.start(Task::new("again")).await,
        Err(AgentError::InvalidState { state: RunState::Done, .. })
    ));
}
