use std::path::PathBuf;

use action_registry::ActionRegistry;
use agent_core::{replay_history, AgentHistory, MockBrowser, ReplayOptions, ReplayReport};
use anyhow::{bail, Context, Result};
use clap::Args;

use crate::cli::context::CliContext;
use crate::script::RunScript;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// History file written by `run --save-history`
    #[arg(long, value_name = "FILE")]
    pub history: PathBuf,

    /// Run script whose browser layout the replay runs against
    #[arg(short, long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Keep going when an action fails
    #[arg(long)]
    pub skip_failures: bool,

    /// Pause between replayed actions (milliseconds)
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

pub async fn cmd_replay(args: ReplayArgs, ctx: &CliContext) -> Result<()> {
    let history = AgentHistory::load_from_file(&args.history)
        .with_context(|| format!("failed to load history {}", args.history.display()))?;
    let browser = match &args.script {
        Some(path) => RunScript::load(path)?.browser(),
        None => MockBrowser::new("about:blank"),
    };
    let registry = ActionRegistry::with_browser_actions()?;
    let options = ReplayOptions {
        skip_failures: args.skip_failures,
        delay_ms: args.delay_ms,
        action_timeout_ms: ctx.config().agent.action_timeout_ms,
        snapshot_timeout_ms: ctx.config().agent.snapshot_timeout_ms,
    };

    let report = replay_history(&history, &registry, browser, &options).await?;
    ctx.output().emit(&report, render_report)?;
    if !report.success {
        bail!("replay finished with {} failed action(s)", report.errors.len());
    }
    Ok(())
}

fn render_report(report: &ReplayReport) -> String {
    let mut out = format!(
        "Replayed: {}\nSkipped: {}\nDuration: {}ms\n",
        report.actions_replayed, report.actions_skipped, report.duration_ms
    );
    for (sequence, message) in &report.errors {
        out.push_str(&format!("Step {sequence}: {message}\n"));
    }
    out
}
