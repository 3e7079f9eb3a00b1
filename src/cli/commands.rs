use clap::Subcommand;

use super::actions::ActionsArgs;
use super::config::ConfigArgs;
use super::history::HistoryArgs;
use super::replay::ReplayArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run a task against the scripted browser and engine
    Run(RunArgs),

    /// List the registered actions and their parameter schemas
    Actions(ActionsArgs),

    /// Replay the successful actions of a saved history
    Replay(ReplayArgs),

    /// Summarise a saved history file
    History(HistoryArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}
