//! Command line surface of the `webpilot` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use super::commands::Commands;
use super::output::OutputFormat;

/// Console log verbosity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Run scripted browser agent tasks, inspect their histories and replay them.
#[derive(Parser, Debug)]
#[command(name = "webpilot", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Config file [default: config/webpilot.yaml, then the user config directory]
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Console log level, over `logging.level` from the config. RUST_LOG wins over both
    #[arg(short, long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Same as `--log-level debug`
    #[arg(short, long, global = true, conflicts_with = "log_level")]
    pub debug: bool,

    /// Format of the command output on stdout
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl CliArgs {
    /// Level asked for on the command line, if any.
    pub fn requested_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            Some(LogLevel::Debug)
        } else {
            self.log_level
        }
    }
}
