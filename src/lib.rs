//! WebPilot command line front end.
//!
//! Wires the action registry, the watchdog supervisor and the agent loop
//! together behind a scripted browser so runs can be driven from YAML files,
//! persisted and replayed.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod script;

pub use config::{AppConfig, LoggingConfig};
pub use script::{RunScript, ScriptError};
