use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("watchdog `{0}` panicked")]
    ObserverPanicked(String),
    #[error("watchdog `{0}` task was aborted")]
    ObserverAborted(String),
}
