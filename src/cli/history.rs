use std::path::PathBuf;

use agent_core::AgentHistory;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct HistoryArgs {
    /// History file written by `run --save-history`
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Steps included in the rendered summary
    #[arg(long, default_value_t = 10)]
    pub last: usize,
}

#[derive(Serialize)]
struct HistoryView {
    tasks: Vec<String>,
    steps: usize,
    done: bool,
    successful: Option<bool>,
    final_result: Option<String>,
    urls: Vec<String>,
    actions: Vec<String>,
    errors: Vec<(u32, String)>,
    #[serde(skip)]
    summary: String,
}

pub async fn cmd_history(args: HistoryArgs, ctx: &CliContext) -> Result<()> {
    let history = AgentHistory::load_from_file(&args.file)
        .with_context(|| format!("failed to load history {}", args.file.display()))?;
    let view = HistoryView {
        tasks: history.tasks().to_vec(),
        steps: history.len(),
        done: history.is_done(),
        successful: history.is_successful(),
        final_result: history.final_result(),
        urls: history.urls(),
        actions: history.action_names(),
        errors: history.errors(),
        summary: history.summary(args.last),
    };
    ctx.output().emit(&view, |view| {
        let mut out = String::new();
        for (idx, task) in view.tasks.iter().enumerate() {
            out.push_str(&format!("Task {}: {task}\n", idx + 1));
        }
        out.push_str(&format!("Steps: {} (done: {})\n", view.steps, view.done));
        if let Some(result) = &view.final_result {
            out.push_str(&format!("Result: {result}\n"));
        }
        out.push_str(&view.summary);
        out
    })
}
