//! Watchdog Supervisor.
//!
//! Independent observers of a browser session's event feed. Each watchdog
//! covers one category of out-of-band event and raises [`WatchdogSignal`]s
//! into an ordered channel drained by the agent loop at turn boundaries.
//! Watchdogs observe only; they hold no handle able to mutate the browser.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod signal;
pub mod supervisor;
pub mod watchdogs;

pub use config::WatchdogConfig;
pub use errors::WatchdogError;
pub use signal::{Severity, SignalCategory, SignalPayload, WatchdogSignal};
pub use supervisor::{EpochPublisher, SignalDrain, SignalReceiver, WatchdogSupervisor};
pub use watchdogs::{
    CrashWatchdog, DialogWatchdog, DownloadWatchdog, NavigationWatchdog, PopupWatchdog,
    SessionWatchdog, Watchdog,
};
