use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `value` to stdout; `human` renders the text form.
    pub fn emit<T, F>(&self, value: &T, human: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&T) -> String,
    {
        let rendered = match self {
            OutputFormat::Human => human(value),
            OutputFormat::Json => {
                serde_json::to_string_pretty(value).context("failed to render JSON output")?
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(value).context("failed to render YAML output")?
            }
        };
        println!("{}", rendered.trim_end());
        Ok(())
    }
}
