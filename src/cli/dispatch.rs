use super::actions::cmd_actions;
use super::config::cmd_config;
use super::env::CliArgs;
use super::history::cmd_history;
use super::replay::cmd_replay;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Actions(args) => cmd_actions(args, ctx).await,
        Commands::Replay(args) => cmd_replay(args, ctx).await,
        Commands::History(args) => cmd_history(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
