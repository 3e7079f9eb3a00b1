use serde::{Deserialize, Serialize};

use crate::watchdogs::{
    CrashWatchdog, DialogWatchdog, DownloadWatchdog, NavigationWatchdog, PopupWatchdog,
    SessionWatchdog, Watchdog,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Consecutive navigation timeouts in one step before the run is lost.
    pub navigation_timeout_threshold: u32,
    pub popups: bool,
    pub dialogs: bool,
    pub downloads: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_threshold: 3,
            popups: true,
            dialogs: true,
            downloads: true,
        }
    }
}

impl WatchdogConfig {
    pub fn with_navigation_timeout_threshold(mut self, threshold: u32) -> Self {
        self.navigation_timeout_threshold = threshold.max(1);
        self
    }

    /// Observers to attach. Fatal categories are always present.
    pub fn build_watchdogs(&self) -> Vec<Box<dyn Watchdog>> {
        let mut watchdogs: Vec<Box<dyn Watchdog>> = vec![
            Box::new(CrashWatchdog),
            Box::new(SessionWatchdog::default()),
            Box::new(NavigationWatchdog::new(self.navigation_timeout_threshold)),
        ];
        if self.popups {
            watchdogs.push(Box::new(PopupWatchdog));
        }
        if self.dialogs {
            watchdogs.push(Box::new(DialogWatchdog));
        }
        if self.downloads {
            watchdogs.push(Box::new(DownloadWatchdog));
        }
        watchdogs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_observers_cannot_be_disabled() {
        let config = WatchdogConfig {
            popups: false,
            dialogs: false,
            downloads: false,
            ..WatchdogConfig::default()
        };
        let names: Vec<&str> = config.build_watchdogs().iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["crash", "session", "navigation"]);
        assert_eq!(WatchdogConfig::default().build_watchdogs().len(), 6);
    }
}
