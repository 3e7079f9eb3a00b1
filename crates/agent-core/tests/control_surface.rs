use std::sync::Arc;
use std::time::Duration;

use action_registry::{ActionCall, ActionRegistry};
use agent_core::{
    replay_history, Agent, AgentError, AgentHistory, AgentLoopConfig, AgentOutput, DecisionRequest,
    EngineError, FailureReason, FinalActionsPolicy, MockBrowser, ReasoningEngine, ReplayOptions,
    RunState, ScriptedEngine, StopHandle, Task,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use watchdog::{SignalCategory, WatchdogConfig, WatchdogSupervisor};
use webpilot_core_types::{BrowserEvent, PageId};

fn registry() -> Arc<ActionRegistry> {
    Arc::new(ActionRegistry::with_browser_actions().unwrap())
}

fn navigate(url: &str) -> ActionCall {
    ActionCall::new("navigate", json!({ "url": url }))
}

fn scroll() -> ActionCall {
    ActionCall::bare("scroll")
}

fn extract(query: &str) -> ActionCall {
    ActionCall::new("extract_content", json!({ "query": query }))
}

fn done(text: &str) -> ActionCall {
    ActionCall::new("done", json!({ "text": text }))
}

fn turn(actions: Vec<ActionCall>) -> Result<AgentOutput, EngineError> {
    Ok(AgentOutput::new(actions))
}

/// Engine that requests a stop while deciding its `stop_at`-th turn.
struct StoppingEngine {
    inner: ScriptedEngine,
    stop_at: usize,
    handle: Mutex<Option<StopHandle>>,
}

#[async_trait]
impl ReasoningEngine for StoppingEngine {
    async fn decide(&self, request: &DecisionRequest) -> Result<AgentOutput, EngineError> {
        let output = self.inner.decide(request).await;
        if self.inner.requests().len() == self.stop_at {
            if let Some(handle) = self.handle.lock().as_ref() {
                handle.stop();
            }
        }
        output
    }
}

#[tokio::test]
async fn stop_is_observed_at_the_next_turn_boundary() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(StoppingEngine {
        inner: ScriptedEngine::repeating(AgentOutput::new(vec![scroll(), scroll()])),
        stop_at: 2,
        handle: Mutex::new(None),
    });
    let task = Task::new("scroll a while").with_final_actions(vec![extract("title")]);
    let mut agent = Agent::new(AgentLoopConfig::minimal(), registry(), engine.clone(), browser.clone());
    *engine.handle.lock() = Some(agent.stop_handle());

    let outcome = agent.start(task).await.unwrap();

    assert_eq!(outcome.state, RunState::Stopped);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.error.as_deref(), Some("cancellation_requested: stop requested"));
    let history = agent.history().snapshot();
    assert_eq!(history.len(), 2);
    assert!(history.steps().iter().all(|step| step.results.len() == 2));
    assert!(outcome.final_action_results.is_empty());
    assert!(!browser.calls().iter().any(|call| call.starts_with("extract_text")));
}

#[tokio::test]
async fn follow_up_task_continues_the_same_history_with_a_fresh_budget() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![scroll()]),
        turn(vec![done("found the docs")]),
        turn(vec![done("found the changelog")]),
    ]));
    let config = AgentLoopConfig::minimal().max_steps(2);
    let mut agent = Agent::new(config, registry(), engine.clone(), browser);

    let first = agent.start(Task::new("find the docs")).await.unwrap();
    assert!(first.is_success());
    assert_eq!(agent.final_result().as_deref(), Some("found the docs"));

    agent.add_follow_up_task("now find the changelog").unwrap();
    assert_eq!(agent.state(), RunState::Running);
    let second = agent.run().await;

    assert_eq!(second.state, RunState::Done);
    assert_eq!(second.steps, 3);
    let history = agent.history().snapshot();
    assert_eq!(history.tasks().len(), 2);
    assert_eq!(history.steps()[2].sequence, 3);
    assert_eq!(history.steps()[2].task_index, 1);

    let request = engine.requests().pop().unwrap();
    assert_eq!(request.task, "now find the changelog");
    assert_eq!(request.previous_tasks, vec!["find the docs".to_string()]);
    assert_eq!(request.step, 1);
    assert!(request.history_summary.contains("found the docs"));
}

#[tokio::test]
async fn final_actions_follow_the_configured_policy() {
    async fn run(policy: FinalActionsPolicy, script: Vec<Result<AgentOutput, EngineError>>) -> agent_core::RunOutcome {
        let browser = MockBrowser::new("https://example.com");
        browser.set_page_text("Release notes");
        let engine = Arc::new(ScriptedEngine::new(script));
        let config = AgentLoopConfig::minimal().max_steps(1).final_actions(policy);
        let mut agent = Agent::new(config, registry(), engine, browser);
        let task = Task::new("read").with_final_actions(vec![extract("notes")]);
        let outcome = agent.start(task).await.unwrap();
        assert!(!agent
            .history()
            .with(|history| history.action_names().contains(&"extract_content".to_string())));
        outcome
    }

    let done_run = run(FinalActionsPolicy::OnDone, vec![turn(vec![done("ok")])]).await;
    assert_eq!(done_run.final_action_results.len(), 1);
    assert_eq!(
        done_run.final_action_results[0].extracted_content.as_deref(),
        Some("Release notes")
    );
    assert_eq!(done_run.final_content.as_deref(), Some("ok"));

    let failed_run = run(FinalActionsPolicy::OnDone, vec![turn(vec![scroll()])]).await;
    assert_eq!(failed_run.failure, Some(FailureReason::StepLimitExceeded));
    assert!(failed_run.final_action_results.is_empty());

    let failed_run = run(FinalActionsPolicy::OnDoneOrFailed, vec![turn(vec![scroll()])]).await;
    assert_eq!(failed_run.final_action_results.len(), 1);

    let never = run(FinalActionsPolicy::Never, vec![turn(vec![done("ok")])]).await;
    assert!(never.final_action_results.is_empty());
}

#[tokio::test]
async fn initial_actions_run_before_the_engine_and_outside_the_budget() {
    let browser = MockBrowser::new("about:blank");
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![done("landed")])]));
    let config = AgentLoopConfig::minimal().max_steps(1);
    let mut agent = Agent::new(config, registry(), engine.clone(), browser);
    let task = Task::new("check the landing page")
        .with_initial_actions(vec![navigate("https://example.com/landing")]);

    let outcome = agent.start(task).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    let history = agent.history().snapshot();
    assert_eq!(history.len(), 2);
    assert!(history.steps()[0].model_output.is_none());
    assert_eq!(engine.requests()[0].snapshot.url, "https://example.com/landing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn advisories_reach_the_next_snapshot() {
    let browser = MockBrowser::new("https://example.com");
    let (_supervisor, signals, epochs) =
        WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
    browser.emit_on(
        "scroll",
        BrowserEvent::TargetCreated {
            page: PageId::from("popup-1"),
            url: "https://ads.example.com".into(),
            opener: Some(PageId::from("page-1")),
            by_agent: false,
        },
    );
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![scroll()]),
        turn(vec![done("closed the ad later")]),
    ]));
    let mut agent = Agent::new(AgentLoopConfig::minimal(), registry(), engine.clone(), browser)
        .with_signals(signals, epochs);

    let outcome = agent.start(Task::new("read the article")).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    let second = &engine.requests()[1];
    assert_eq!(second.notices.len(), 1);
    assert_eq!(second.snapshot.tabs.len(), 2);
    let step = agent.history().snapshot().steps()[1].clone();
    assert_eq!(step.advisories.len(), 1);
    assert_eq!(step.advisories[0].category(), SignalCategory::NewTab);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn navigation_timeout_retries_the_same_step_before_becoming_fatal() {
    let browser = MockBrowser::new("https://example.com");
    let config = WatchdogConfig::default().with_navigation_timeout_threshold(2);
    let (_supervisor, signals, epochs) = WatchdogSupervisor::attach(&*browser.bus(), &config);
    for _ in 0..2 {
        browser.emit_on(
            "scroll",
            BrowserEvent::NavigationTimedOut {
                page: PageId::from("page-1"),
                url: "https://slow.example.com".into(),
                elapsed_ms: 30_000,
            },
        );
    }
    let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![scroll()])));
    let mut agent = Agent::new(AgentLoopConfig::minimal(), registry(), engine, browser)
        .with_signals(signals, epochs);

    let outcome = agent.start(Task::new("open the slow page")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::EnvironmentLost));
    assert_eq!(outcome.steps, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_navigation_timeouts_become_fatal_at_the_default_threshold() {
    let browser = MockBrowser::new("https://example.com");
    let (_supervisor, signals, epochs) =
        WatchdogSupervisor::attach(&*browser.bus(), &WatchdogConfig::default());
    for _ in 0..10 {
        browser.emit_on(
            "scroll",
            BrowserEvent::NavigationTimedOut {
                page: PageId::from("page-1"),
                url: "https://slow.example.com".into(),
                elapsed_ms: 30_000,
            },
        );
    }
    let engine = Arc::new(ScriptedEngine::repeating(AgentOutput::new(vec![scroll()])));
    let config = AgentLoopConfig::minimal().max_steps(10).max_failures(0);
    let mut agent = Agent::new(config, registry(), engine, browser).with_signals(signals, epochs);

    let outcome = agent.start(Task::new("open the slow page")).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::EnvironmentLost));
    assert_eq!(outcome.steps, 3);
}

#[tokio::test]
async fn persisted_history_resumes_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let browser = MockBrowser::new("https://example.com");
    browser.add_element("input", "Search");
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![
            navigate("https://example.com/search"),
            ActionCall::new("type_text", json!({ "index": 0, "text": "rust" })),
        ]),
        turn(vec![ActionCall::new("click", json!({ "index": 7 }))]),
        turn(vec![done("searched")]),
    ]));
    let mut agent = Agent::new(AgentLoopConfig::minimal(), registry(), engine, browser);
    agent.start(Task::new("search for rust")).await.unwrap();
    agent.history().snapshot().save_to_file(&path).unwrap();

    let loaded = AgentHistory::load_from_file(&path).unwrap();
    let engine = Arc::new(ScriptedEngine::new(vec![turn(vec![done("again")])]));
    let mut resumed = Agent::new(
        AgentLoopConfig::minimal(),
        registry(),
        engine,
        MockBrowser::new("https://example.com"),
    )
    .with_history(loaded.clone());
    assert!(resumed.is_done());
    assert!(matches!(
        resumed.start(Task::new("nope")).await,
        Err(AgentError::InvalidState { .. })
    ));
    resumed.add_follow_up_task("search again").unwrap();
    let outcome = resumed.run().await;
    assert_eq!(outcome.steps, 4);

    let target = MockBrowser::new("https://example.com");
    target.add_element("input", "Search");
    let report = replay_history(&loaded, &registry(), target.clone(), &ReplayOptions::default())
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.actions_replayed, 2);
    assert_eq!(report.actions_skipped, 2);
    assert_eq!(
        target.calls(),
        vec![
            "navigate(https://example.com/search)".to_string(),
            "type_text(0, rust)".to_string()
        ]
    );

    let bare = MockBrowser::new("https://example.com");
    let err = replay_history(&loaded, &registry(), bare.clone(), &ReplayOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Replay { sequence: 1, .. }));

    let options = ReplayOptions {
        skip_failures: true,
        ..ReplayOptions::default()
    };
    let report = replay_history(&loaded, &registry(), bare, &options).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn replay_gives_up_on_a_hanging_snapshot() {
    let browser = MockBrowser::new("https://example.com");
    let engine = Arc::new(ScriptedEngine::new(vec![
        turn(vec![navigate("https://example.com/docs")]),
        turn(vec![done("read")]),
    ]));
    let mut agent = Agent::new(AgentLoopConfig::minimal(), registry(), engine, browser);
    agent.start(Task::new("read the docs")).await.unwrap();
    let history = agent.history().snapshot();

    let stalled = MockBrowser::new("https://example.com");
    stalled.delay("snapshot", Duration::from_secs(5));
    let options = ReplayOptions {
        snapshot_timeout_ms: 50,
        ..ReplayOptions::default()
    };
    let err = tokio::time::timeout(
        Duration::from_secs(2),
        replay_history(&history, &registry(), stalled.clone(), &options),
    )
    .await
    .expect("replay must not hang")
    .unwrap_err();

    match err {
        AgentError::Replay { sequence, action, message } => {
            assert_eq!(sequence, 1);
            assert_eq!(action, "navigate");
            assert!(message.contains("timed out after 50ms"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(stalled.calls().is_empty());
}
