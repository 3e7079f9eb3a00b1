use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::context::CliContext;
use crate::config::AppConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {}

#[derive(Serialize)]
struct ConfigView<'a> {
    path: String,
    config: &'a AppConfig,
}

pub async fn cmd_config(_args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let view = ConfigView {
        path: ctx.config_path().display().to_string(),
        config: ctx.config(),
    };
    ctx.output().emit(&view, |view| {
        let body = serde_yaml::to_string(view.config).unwrap_or_default();
        format!("# {}\n{}", view.path, body)
    })
}
