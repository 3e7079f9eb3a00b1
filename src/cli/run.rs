use std::path::PathBuf;
use std::sync::Arc;

use action_registry::ActionRegistry;
use agent_core::{Agent, RunOutcome, RunState};
use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};
use watchdog::WatchdogSupervisor;

use crate::cli::context::CliContext;
use crate::metrics;
use crate::script::RunScript;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Run script (YAML) describing the task, engine turns and browser
    #[arg(short, long, value_name = "FILE")]
    pub script: PathBuf,

    /// Write the resulting history to this file
    #[arg(long, value_name = "FILE")]
    pub save_history: Option<PathBuf>,

    /// Override the configured step budget
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Run without the watchdog supervisor
    #[arg(long)]
    pub no_watchdogs: bool,

    /// Print Prometheus metrics to stderr after the run
    #[arg(long)]
    pub metrics: bool,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let script = RunScript::load(&args.script)?;
    let mut config = ctx.config().agent.clone();
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }

    let registry = Arc::new(ActionRegistry::with_browser_actions()?);
    let browser = script.browser();
    let engine = Arc::new(script.engine()?);
    let mut agent = Agent::new(config, registry, engine, browser.clone());

    let supervisor = if args.no_watchdogs {
        None
    } else {
        let (supervisor, signals, epochs) =
            WatchdogSupervisor::attach(&*browser.bus(), &ctx.config().watchdog);
        info!(observers = ?supervisor.observer_names(), "watchdogs attached");
        agent = agent.with_signals(signals, epochs);
        Some(supervisor)
    };

    let stop = agent.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next turn");
            stop.stop();
        }
    });

    let mut outcome = agent.start(script.task()?).await?;
    for goal in &script.follow_ups {
        if outcome.state != RunState::Done {
            break;
        }
        agent.add_follow_up_task(goal.clone())?;
        outcome = agent.run().await;
    }
    interrupt.abort();

    report(&agent, &outcome, supervisor, &args, ctx).await
}

/// Save and print the finished run, then shut the watchdogs down. A failed
/// detach is reported after the history is on disk.
async fn report(
    agent: &Agent,
    outcome: &RunOutcome,
    supervisor: Option<WatchdogSupervisor>,
    args: &RunArgs,
    ctx: &CliContext,
) -> Result<()> {
    if let Some(path) = &args.save_history {
        agent
            .history()
            .snapshot()
            .save_to_file(path)
            .with_context(|| format!("failed to save history to {}", path.display()))?;
        info!(path = %path.display(), steps = outcome.steps, "history saved");
    }

    ctx.output().emit(outcome, render_outcome)?;

    if args.metrics {
        eprintln!("{}", metrics::render()?);
    }

    let detached = match supervisor {
        Some(supervisor) => supervisor.detach().await,
        None => Ok(()),
    };
    if outcome.state == RunState::Failed {
        if let Err(err) = &detached {
            warn!(error = %err, "watchdogs did not shut down cleanly");
        }
        let reason = outcome.failure.map(|reason| reason.as_str()).unwrap_or("history_rejected");
        bail!("run failed: {reason}");
    }
    detached.context("watchdogs did not shut down cleanly")?;
    Ok(())
}

fn render_outcome(outcome: &RunOutcome) -> String {
    let mut out = format!("State: {}\nSteps: {}\n", outcome.state.as_str(), outcome.steps);
    if let Some(reason) = outcome.failure {
        out.push_str(&format!("Failure: {}\n", reason.as_str()));
    }
    if let Some(content) = &outcome.final_content {
        out.push_str(&format!("Result: {content}\n"));
    }
    if let Some(error) = &outcome.error {
        out.push_str(&format!("Error: {error}\n"));
    }
    for (idx, result) in outcome.final_action_results.iter().enumerate() {
        let text = result
            .extracted_content
            .as_deref()
            .or(result.error.as_deref())
            .unwrap_or("");
        let status = if result.success { "ok" } else { "failed" };
        out.push_str(&format!("Final action {}: {status} {text}\n", idx + 1));
    }
    out
}
