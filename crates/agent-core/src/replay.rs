//! Re-run a recorded history against a browser.
//!
//! Only actions that succeeded originally are replayed, and every one goes
//! through the registry again: arguments and filters are re-validated against
//! a fresh snapshot before dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use action_registry::{ActionRegistry, BrowserPort, DispatchContext};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::history::AgentHistory;

/// Configuration for history replay.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Record actions that fail now and keep going instead of aborting.
    pub skip_failures: bool,
    /// Pause between replayed actions.
    pub delay_ms: u64,
    pub action_timeout_ms: u64,
    /// Bound on the fresh snapshot taken before each replayed action.
    pub snapshot_timeout_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            skip_failures: false,
            delay_ms: 0,
            action_timeout_ms: 30_000,
            snapshot_timeout_ms: 10_000,
        }
    }
}

/// Results from a replay.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub success: bool,
    pub actions_replayed: usize,
    /// Recorded actions left out: failed or terminal originally.
    pub actions_skipped: usize,
    /// `(step sequence, message)` for each action that failed during replay.
    pub errors: Vec<(u32, String)>,
    pub duration_ms: u64,
}

pub async fn replay_history(
    history: &AgentHistory,
    registry: &ActionRegistry,
    browser: Arc<dyn BrowserPort>,
    options: &ReplayOptions,
) -> Result<ReplayReport, AgentError> {
    let started = Instant::now();
    let timeout = Duration::from_millis(options.action_timeout_ms);
    let snapshot_timeout = Duration::from_millis(options.snapshot_timeout_ms);
    let delay = Duration::from_millis(options.delay_ms);
    let mut report = ReplayReport::default();

    for step in history.steps() {
        for (position, call) in step.actions.iter().enumerate() {
            let replayable = step
                .results
                .get(position)
                .is_some_and(|result| result.success && !result.is_done);
            if !replayable {
                report.actions_skipped += 1;
                continue;
            }
            if report.actions_replayed > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let snapshot = match tokio::time::timeout(snapshot_timeout, browser.snapshot()).await {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(err)) => Err(format!("snapshot failed: {err}")),
                Err(_) => Err(format!(
                    "snapshot timed out after {}ms",
                    snapshot_timeout.as_millis()
                )),
            }
            .map_err(|message| AgentError::Replay {
                sequence: step.sequence,
                action: call.name.clone(),
                message,
            })?;
            let cx = DispatchContext::new(Arc::clone(&browser), Arc::new(snapshot), timeout);
            let failure = match registry.dispatch(call, &cx).await {
                Ok(result) if result.success => None,
                Ok(result) => Some(result.error.unwrap_or_else(|| "action failed".to_string())),
                Err(err) => Some(err.to_string()),
            };
            report.actions_replayed += 1;
            debug!(sequence = step.sequence, action = %call.name, ok = failure.is_none(), "replayed action");

            if let Some(message) = failure {
                if !options.skip_failures {
                    return Err(AgentError::Replay {
                        sequence: step.sequence,
                        action: call.name.clone(),
                        message,
                    });
                }
                warn!(sequence = step.sequence, action = %call.name, error = %message, "replayed action failed");
                report.errors.push((step.sequence, message));
            }
        }
    }

    report.success = report.errors.is_empty();
    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        replayed = report.actions_replayed,
        skipped = report.actions_skipped,
        errors = report.errors.len(),
        "history replay finished"
    );
    Ok(report)
}
