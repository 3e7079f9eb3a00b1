use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::env::LogLevel;
use crate::config::{AppConfig, LoggingConfig};

/// Install the global subscriber. Console logs go to stderr so structured
/// command output on stdout stays parseable. The returned guard flushes the
/// optional log file and must outlive the command.
///
/// The level comes from the command line, then `logging.level`, then `warn`;
/// `RUST_LOG` overrides all of them.
pub fn init_logging(requested: Option<LogLevel>, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = match requested {
        Some(level) => level.as_str(),
        None => logging.level.as_deref().unwrap_or("warn"),
    }
    .parse()
    .context("Invalid log level")?;

    let console = if logging.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            std::fs::create_dir_all(&directory)
                .with_context(|| format!("failed to create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// Whether `path` existed; defaults are used otherwise.
    pub found: bool,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => {
            // Priority: ./config/webpilot.yaml > ~/.config/webpilot/config.yaml
            let local_config = PathBuf::from("config/webpilot.yaml");
            if local_config.exists() {
                local_config
            } else {
                let mut path = dirs::config_dir().context("Failed to get config directory")?;
                path.push("webpilot");
                path.push("config.yaml");
                path
            }
        }
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: AppConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(LoadedConfig {
            config,
            path: config_path,
            found: true,
        })
    } else {
        Ok(LoadedConfig {
            config: AppConfig::default(),
            path: config_path,
            found: false,
        })
    }
}
