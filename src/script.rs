//! YAML run scripts.
//!
//! A script describes a task, the turns the scripted engine answers with and
//! how the in-memory browser is laid out and misbehaves:
//!
//! ```yaml
//! task: find the changelog
//! start_url: https://example.com
//! elements:
//!   - { tag: a, text: Changelog }
//! turns:
//!   - actions: [{ click: { index: 0 } }]
//!   - raw: '{"actions": [{"done": {"text": "found it"}}]}'
//! browser:
//!   - on: click
//!     emit: { type: target_crashed, page: page-1, reason: oom }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use action_registry::ActionCall;
use agent_core::{AgentOutput, EngineError, MockBrowser, ScriptedEngine, Task};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use webpilot_core_types::{BrowserEvent, InteractiveElement};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse script: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{section} action #{position} is malformed: {source}")]
    Action {
        section: &'static str,
        position: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("turn #{position} has invalid raw output: {source}")]
    RawTurn {
        position: usize,
        #[source]
        source: EngineError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunScript {
    pub task: String,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub page_text: Option<String>,
    #[serde(default)]
    pub elements: Vec<ScriptElement>,
    #[serde(default)]
    pub initial_actions: Vec<Value>,
    #[serde(default)]
    pub final_actions: Vec<Value>,
    /// Goals started with `add_follow_up_task` after each successful run.
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default)]
    pub turns: Vec<ScriptTurn>,
    /// Keep answering with the last turn once the script is exhausted.
    #[serde(default)]
    pub repeat_last: bool,
    #[serde(default)]
    pub browser: Vec<BrowserHook>,
}

fn default_start_url() -> String {
    "about:blank".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptElement {
    pub tag: String,
    #[serde(default)]
    pub text: String,
}

/// One engine answer. `error` wins over `raw`, which wins over `actions`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptTurn {
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub next_goal: String,
    #[serde(default)]
    pub actions: Vec<Value>,
    /// Model text parsed like a real completion.
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub error: Option<EngineError>,
}

/// Browser behaviour queued for the next call of `on`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserHook {
    pub on: String,
    #[serde(default)]
    pub emit: Option<BrowserEvent>,
    #[serde(default)]
    pub fail: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl RunScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ScriptError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn task(&self) -> Result<Task, ScriptError> {
        Ok(Task::new(self.task.clone())
            .with_initial_actions(parse_actions("initial", &self.initial_actions)?)
            .with_final_actions(parse_actions("final", &self.final_actions)?))
    }

    pub fn engine(&self) -> Result<ScriptedEngine, ScriptError> {
        let mut turns = Vec::with_capacity(self.turns.len());
        for (position, turn) in self.turns.iter().enumerate() {
            turns.push(turn.resolve(position)?);
        }
        let fallback = match turns.last() {
            Some(Ok(output)) if self.repeat_last => Some(output.clone()),
            _ => None,
        };
        let engine = ScriptedEngine::new(turns);
        Ok(match fallback {
            Some(output) => engine.with_fallback(output),
            None => engine,
        })
    }

    /// In-memory browser laid out and rigged as the script describes.
    pub fn browser(&self) -> Arc<MockBrowser> {
        let browser = MockBrowser::new(self.start_url.clone());
        if let Some(title) = &self.title {
            browser.set_title(title.clone());
        }
        if let Some(text) = &self.page_text {
            browser.set_page_text(text.clone());
        }
        browser.set_elements(
            self.elements
                .iter()
                .enumerate()
                .map(|(index, element)| InteractiveElement {
                    index: index as u32,
                    tag: element.tag.clone(),
                    text: element.text.clone(),
                })
                .collect(),
        );
        for hook in &self.browser {
            if let Some(event) = &hook.emit {
                browser.emit_on(&hook.on, event.clone());
            }
            if let Some(message) = &hook.fail {
                browser.fail_next(&hook.on, message.clone());
            }
            if let Some(ms) = hook.delay_ms {
                browser.delay(&hook.on, Duration::from_millis(ms));
            }
        }
        browser
    }
}

impl ScriptTurn {
    fn resolve(&self, position: usize) -> Result<Result<AgentOutput, EngineError>, ScriptError> {
        if let Some(error) = &self.error {
            return Ok(Err(error.clone()));
        }
        if let Some(raw) = &self.raw {
            // Unparseable text is a legitimate turn: the loop records it as
            // invalid output. Only an empty string is a script mistake.
            if raw.trim().is_empty() {
                return Err(ScriptError::RawTurn {
                    position: position + 1,
                    source: EngineError::InvalidOutput("empty raw output".into()),
                });
            }
            return Ok(AgentOutput::from_model_text(raw));
        }
        let actions = parse_actions("turn", &self.actions)?;
        Ok(Ok(AgentOutput::new(actions)
            .with_thinking(self.thinking.clone())
            .with_next_goal(self.next_goal.clone())))
    }
}

fn parse_actions(section: &'static str, values: &[Value]) -> Result<Vec<ActionCall>, ScriptError> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            ActionCall::from_value(value.clone()).map_err(|source| ScriptError::Action {
                section,
                position: idx + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ReasoningEngine;

    const SCRIPT: &str = r#"
task: find the changelog
start_url: https://example.com
elements:
  - { tag: a, text: Docs }
  - { tag: a, text: Changelog }
initial_actions:
  - { navigate: { url: "https://example.com/home" } }
turns:
  - actions: [{ click: { index: 1 } }]
  - raw: 'sure: {"actions": [{"done": {"text": "found"}}]}'
  - error: { kind: transient, detail: "socket closed" }
browser:
  - on: click
    emit: { type: target_crashed, page: page-1, reason: oom }
"#;

    #[test]
    fn parses_turns_hooks_and_actions() {
        let script = RunScript::from_yaml(SCRIPT).unwrap();
        assert_eq!(script.turns.len(), 3);
        assert!(matches!(
            script.browser[0].emit,
            Some(BrowserEvent::TargetCrashed { .. })
        ));
        let task = script.task().unwrap();
        assert_eq!(task.initial_actions[0].name, "navigate");
        assert!(task.final_actions.is_empty());

        let first = script.turns[0].resolve(0).unwrap().unwrap();
        assert_eq!(first.actions[0].name, "click");
        let second = script.turns[1].resolve(1).unwrap().unwrap();
        assert_eq!(second.actions[0].name, "done");
        assert_eq!(
            script.turns[2].resolve(2).unwrap().unwrap_err(),
            EngineError::Transient("socket closed".into())
        );
    }

    #[tokio::test]
    async fn browser_layout_follows_the_script() {
        use action_registry::BrowserPort;

        let browser = RunScript::from_yaml(SCRIPT).unwrap().browser();
        let snapshot = browser.snapshot().await.unwrap();
        assert_eq!(snapshot.url, "https://example.com");
        assert_eq!(snapshot.elements.len(), 2);
        assert_eq!(snapshot.elements[1].text, "Changelog");
        assert!(browser.calls().is_empty());
    }

    #[tokio::test]
    async fn repeat_last_keeps_answering() {
        let script = RunScript::from_yaml(
            "task: scroll\nrepeat_last: true\nturns:\n  - actions: [{ scroll: { down: true } }]\n",
        )
        .unwrap();
        let engine = script.engine().unwrap();
        let request = agent_core::DecisionRequest {
            task: "scroll".into(),
            previous_tasks: Vec::new(),
            step: 1,
            history_summary: String::new(),
            snapshot: webpilot_core_types::BrowserSnapshot::new("about:blank"),
            notices: Vec::new(),
            actions: Vec::new(),
            max_actions: 3,
        };
        for _ in 0..3 {
            let output = engine.decide(&request).await.unwrap();
            assert_eq!(output.actions[0].name, "scroll");
        }
    }

    #[test]
    fn malformed_action_names_its_position() {
        let script = RunScript::from_yaml("task: t\nfinal_actions: [42]\n").unwrap();
        let err = script.task().unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Action { section: "final", position: 1, .. }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            RunScript::from_yaml("task: t\nturnz: []\n"),
            Err(ScriptError::Parse(_))
        ));
    }
}
