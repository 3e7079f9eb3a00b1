use std::env;
use std::path::PathBuf;

use agent_core::AgentLoopConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;
use watchdog::WatchdogConfig;

/// Top-level configuration file (`webpilot.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentLoopConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human formatter.
    pub json: bool,
    /// Additional JSON log file, written through a non-blocking appender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Default filter when `RUST_LOG` is unset and no level was passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl AppConfig {
    /// Apply `WEBPILOT_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(steps) = env_number("WEBPILOT_MAX_STEPS") {
            self.agent.max_steps = steps;
        }
        if let Some(failures) = env_number("WEBPILOT_MAX_FAILURES") {
            self.agent.max_consecutive_failures = failures;
        }
        if let Some(actions) = env_number("WEBPILOT_MAX_ACTIONS_PER_STEP") {
            self.agent.max_actions_per_step = actions;
        }
        if let Ok(value) = env::var("WEBPILOT_LOG_JSON") {
            self.logging.json = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Ok(path) = env::var("WEBPILOT_LOG_FILE") {
            if !path.trim().is_empty() {
                self.logging.file = Some(PathBuf::from(path));
            }
        }
    }
}

fn env_number(key: &str) -> Option<u32> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}
