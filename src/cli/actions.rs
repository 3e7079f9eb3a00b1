use action_registry::ActionRegistry;
use anyhow::Result;
use clap::Args;
use webpilot_core_types::BrowserSnapshot;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ActionsArgs {
    /// Only list actions whose domain filter admits this URL
    #[arg(long)]
    pub url: Option<String>,
}

pub async fn cmd_actions(args: ActionsArgs, ctx: &CliContext) -> Result<()> {
    let registry = ActionRegistry::with_browser_actions()?;
    let snapshot = args.url.map(BrowserSnapshot::new);
    let specs = match &snapshot {
        Some(snapshot) => registry.specification_for(snapshot),
        None => registry.specification(),
    };
    ctx.output()
        .emit(&specs, |_| registry.prompt_description(snapshot.as_ref()))
}
