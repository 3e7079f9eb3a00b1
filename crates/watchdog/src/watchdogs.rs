//! The individual observers. Each one looks at a single category of event
//! and never touches the browser.

use tracing::debug;
use webpilot_core_types::BrowserEvent;

use crate::signal::{SignalPayload, WatchdogSignal};

/// Observer of one category of out-of-band events.
///
/// `observe` is called for every event on the session feed, in feed order.
pub trait Watchdog: Send + 'static {
    fn name(&self) -> &'static str;

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal>;

    /// Called once when the event feed ends.
    fn on_feed_closed(&mut self, epoch: u64) -> Option<WatchdogSignal> {
        let _ = epoch;
        None
    }
}

#[derive(Debug, Default)]
pub struct CrashWatchdog;

impl Watchdog for CrashWatchdog {
    fn name(&self) -> &'static str {
        "crash"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::TargetCrashed { page, reason } => Some(WatchdogSignal::fatal(
                self.name(),
                SignalPayload::Crash {
                    page: page.clone(),
                    reason: reason.clone(),
                },
                epoch,
            )),
            _ => None,
        }
    }
}

/// Session teardown, reported either explicitly or by the feed going away.
#[derive(Debug, Default)]
pub struct SessionWatchdog {
    reported: bool,
}

impl Watchdog for SessionWatchdog {
    fn name(&self) -> &'static str {
        "session"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::SessionClosed { reason } if !self.reported => {
                self.reported = true;
                Some(WatchdogSignal::fatal(
                    self.name(),
                    SignalPayload::SessionClosed {
                        reason: reason.clone(),
                    },
                    epoch,
                ))
            }
            _ => None,
        }
    }

    fn on_feed_closed(&mut self, epoch: u64) -> Option<WatchdogSignal> {
        if self.reported {
            return None;
        }
        self.reported = true;
        Some(WatchdogSignal::fatal(
            self.name(),
            SignalPayload::SessionClosed {
                reason: "event feed closed".to_string(),
            },
            epoch,
        ))
    }
}

/// Tabs that appeared without an action asking for them.
#[derive(Debug, Default)]
pub struct PopupWatchdog;

impl Watchdog for PopupWatchdog {
    fn name(&self) -> &'static str {
        "popup"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::TargetCreated {
                page,
                url,
                opener,
                by_agent: false,
            } => Some(WatchdogSignal::advisory(
                self.name(),
                SignalPayload::NewTab {
                    page: page.clone(),
                    url: url.clone(),
                    opener: opener.clone(),
                },
                epoch,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DialogWatchdog;

impl Watchdog for DialogWatchdog {
    fn name(&self) -> &'static str {
        "dialog"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::DialogOpened {
                page,
                kind,
                message,
            } => Some(WatchdogSignal::advisory(
                self.name(),
                SignalPayload::Dialog {
                    page: page.clone(),
                    kind: *kind,
                    message: message.clone(),
                },
                epoch,
            )),
            _ => None,
        }
    }
}

/// Reports finished downloads; started downloads are not interesting yet.
#[derive(Debug, Default)]
pub struct DownloadWatchdog;

impl Watchdog for DownloadWatchdog {
    fn name(&self) -> &'static str {
        "download"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::DownloadCompleted { url, path } => Some(WatchdogSignal::advisory(
                self.name(),
                SignalPayload::Download {
                    url: url.clone(),
                    path: path.clone(),
                },
                epoch,
            )),
            _ => None,
        }
    }
}

/// Counts consecutive navigation timeouts.
///
/// Below the threshold the timeout is advisory; reaching it is fatal. The
/// count carries across step epochs as long as every epoch since the last
/// timeout saw one too. A finished navigation, or a whole epoch without a
/// timeout, resets it.
#[derive(Debug)]
pub struct NavigationWatchdog {
    threshold: u32,
    /// Epoch of the most recent counted timeout.
    last_timeout_epoch: Option<u64>,
    consecutive: u32,
}

impl NavigationWatchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_timeout_epoch: None,
            consecutive: 0,
        }
    }

    fn record_timeout(&mut self, epoch: u64) -> u32 {
        let streak_broken = self
            .last_timeout_epoch
            .is_some_and(|last| epoch > last.saturating_add(1));
        if streak_broken {
            self.consecutive = 0;
        }
        self.last_timeout_epoch = Some(epoch);
        self.consecutive += 1;
        self.consecutive
    }
}

impl Default for NavigationWatchdog {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Watchdog for NavigationWatchdog {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn observe(&mut self, event: &BrowserEvent, epoch: u64) -> Option<WatchdogSignal> {
        match event {
            BrowserEvent::NavigationTimedOut { page, url, .. } => {
                let occurrences = self.record_timeout(epoch);
                let payload = SignalPayload::NavigationTimeout {
                    page: page.clone(),
                    url: url.clone(),
                    occurrences,
                };
                if occurrences >= self.threshold {
                    Some(WatchdogSignal::fatal(self.name(), payload, epoch))
                } else {
                    Some(WatchdogSignal::advisory(self.name(), payload, epoch))
                }
            }
            BrowserEvent::NavigationFinished { .. } => {
                if self.consecutive > 0 {
                    debug!(cleared = self.consecutive, epoch, "navigation recovered");
                }
                self.consecutive = 0;
                self.last_timeout_epoch = None;
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Severity, SignalCategory};
    use webpilot_core_types::{DialogKind, PageId};

    fn timeout() -> BrowserEvent {
        BrowserEvent::NavigationTimedOut {
            page: PageId::from("p1"),
            url: "https://slow.example.com".into(),
            elapsed_ms: 30_000,
        }
    }

    #[test]
    fn navigation_timeouts_escalate_within_one_epoch() {
        let mut watchdog = NavigationWatchdog::new(3);
        let severities: Vec<Severity> = (0..3)
            .map(|_| watchdog.observe(&timeout(), 7).unwrap().severity)
            .collect();
        assert_eq!(
            severities,
            vec![Severity::Advisory, Severity::Advisory, Severity::Fatal]
        );
    }

    #[test]
    fn navigation_timeouts_add_up_across_adjacent_epochs() {
        let mut watchdog = NavigationWatchdog::default();
        assert!(!watchdog.observe(&timeout(), 1).unwrap().is_fatal());
        assert!(!watchdog.observe(&timeout(), 1).unwrap().is_fatal());
        assert!(watchdog.observe(&timeout(), 2).unwrap().is_fatal());
    }

    #[test]
    fn navigation_count_resets_on_quiet_epoch_and_success() {
        let mut watchdog = NavigationWatchdog::new(2);
        assert!(!watchdog.observe(&timeout(), 1).unwrap().is_fatal());
        // Epoch 2 passed without a timeout.
        assert!(!watchdog.observe(&timeout(), 3).unwrap().is_fatal());
        watchdog.observe(
            &BrowserEvent::NavigationFinished {
                page: PageId::from("p1"),
                url: "https://slow.example.com".into(),
            },
            3,
        );
        assert!(!watchdog.observe(&timeout(), 3).unwrap().is_fatal());
        assert!(watchdog.observe(&timeout(), 4).unwrap().is_fatal());
    }

    #[test]
    fn popups_ignore_agent_opened_tabs() {
        let mut watchdog = PopupWatchdog;
        let by_agent = BrowserEvent::TargetCreated {
            page: PageId::from("p2"),
            url: "https://example.com/next".into(),
            opener: None,
            by_agent: true,
        };
        assert!(watchdog.observe(&by_agent, 1).is_none());
        let popup = BrowserEvent::TargetCreated {
            page: PageId::from("p3"),
            url: "https://ads.example.com".into(),
            opener: Some(PageId::from("p1")),
            by_agent: false,
        };
        let signal = watchdog.observe(&popup, 1).unwrap();
        assert_eq!(signal.category(), SignalCategory::NewTab);
        assert_eq!(signal.severity, Severity::Advisory);
    }

    #[test]
    fn session_loss_is_reported_once() {
        let mut watchdog = SessionWatchdog::default();
        let closed = BrowserEvent::SessionClosed {
            reason: "browser exited".into(),
        };
        assert!(watchdog.observe(&closed, 3).unwrap().is_fatal());
        assert!(watchdog.on_feed_closed(3).is_none());

        let mut fresh = SessionWatchdog::default();
        let signal = fresh.on_feed_closed(5).unwrap();
        assert_eq!(signal.category(), SignalCategory::SessionClosed);
        assert_eq!(signal.epoch, 5);
    }

    #[test]
    fn crash_and_dialog_policies() {
        let crash = CrashWatchdog
            .observe(
                &BrowserEvent::TargetCrashed {
                    page: PageId::from("p1"),
                    reason: "renderer gone".into(),
                },
                1,
            )
            .unwrap();
        assert!(crash.is_fatal());

        let dialog = DialogWatchdog
            .observe(
                &BrowserEvent::DialogOpened {
                    page: PageId::from("p1"),
                    kind: DialogKind::Confirm,
                    message: "Leave site?".into(),
                },
                1,
            )
            .unwrap();
        assert_eq!(dialog.severity, Severity::Advisory);
        assert!(DownloadWatchdog
            .observe(
                &BrowserEvent::DownloadStarted {
                    url: "https://example.com/a.zip".into(),
                    suggested_name: None,
                },
                1
            )
            .is_none());
    }
}
