use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webpilot_core_types::{BrowserSnapshot, DialogInfo, DialogKind, PageId, TabInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Crash,
    NewTab,
    Download,
    Dialog,
    NavigationTimeout,
    SessionClosed,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Crash => "crash",
            SignalCategory::NewTab => "new_tab",
            SignalCategory::Download => "download",
            SignalCategory::Dialog => "dialog",
            SignalCategory::NavigationTimeout => "navigation_timeout",
            SignalCategory::SessionClosed => "session_closed",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Advisory,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Advisory => "advisory",
            Severity::Fatal => "fatal",
        }
    }
}

/// Category specific data carried by a signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum SignalPayload {
    Crash {
        page: PageId,
        reason: String,
    },
    NewTab {
        page: PageId,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opener: Option<PageId>,
    },
    Download {
        url: String,
        path: String,
    },
    Dialog {
        page: PageId,
        kind: DialogKind,
        message: String,
    },
    NavigationTimeout {
        page: PageId,
        url: String,
        occurrences: u32,
    },
    SessionClosed {
        reason: String,
    },
}

impl SignalPayload {
    pub fn category(&self) -> SignalCategory {
        match self {
            SignalPayload::Crash { .. } => SignalCategory::Crash,
            SignalPayload::NewTab { .. } => SignalCategory::NewTab,
            SignalPayload::Download { .. } => SignalCategory::Download,
            SignalPayload::Dialog { .. } => SignalCategory::Dialog,
            SignalPayload::NavigationTimeout { .. } => SignalCategory::NavigationTimeout,
            SignalPayload::SessionClosed { .. } => SignalCategory::SessionClosed,
        }
    }
}

/// Immutable notice raised by a watchdog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchdogSignal {
    pub id: String,
    /// Name of the watchdog that raised it.
    pub source: String,
    pub severity: Severity,
    pub payload: SignalPayload,
    /// Loop step epoch current when the event was observed.
    pub epoch: u64,
    pub raised_at: DateTime<Utc>,
}

impl WatchdogSignal {
    pub fn new(source: impl Into<String>, severity: Severity, payload: SignalPayload, epoch: u64) -> Self {
        Self {
            id: format!("signal-{}", Uuid::new_v4()),
            source: source.into(),
            severity,
            payload,
            epoch,
            raised_at: Utc::now(),
        }
    }

    pub fn advisory(source: impl Into<String>, payload: SignalPayload, epoch: u64) -> Self {
        Self::new(source, Severity::Advisory, payload, epoch)
    }

    pub fn fatal(source: impl Into<String>, payload: SignalPayload, epoch: u64) -> Self {
        Self::new(source, Severity::Fatal, payload, epoch)
    }

    pub fn category(&self) -> SignalCategory {
        self.payload.category()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// One line description suitable for the engine prompt and logs.
    pub fn describe(&self) -> String {
        match &self.payload {
            SignalPayload::Crash { page, reason } => format!("tab {page} crashed: {reason}"),
            SignalPayload::NewTab { page, url, .. } => format!("new tab {page} opened: {url}"),
            SignalPayload::Download { path, .. } => format!("download finished: {path}"),
            SignalPayload::Dialog { kind, message, .. } => {
                format!("{kind:?} dialog open: {message}")
            }
            SignalPayload::NavigationTimeout {
                url, occurrences, ..
            } => format!("navigation to {url} timed out ({occurrences}x)"),
            SignalPayload::SessionClosed { reason } => format!("browser session closed: {reason}"),
        }
    }

    /// Fold an advisory into the snapshot presented on the next turn.
    pub fn merge_into(&self, snapshot: &mut BrowserSnapshot) {
        match &self.payload {
            SignalPayload::NewTab { page, url, .. } => {
                if !snapshot.tabs.iter().any(|tab| &tab.page == page) {
                    snapshot.tabs.push(TabInfo {
                        page: page.clone(),
                        url: url.clone(),
                        title: None,
                    });
                }
            }
            SignalPayload::Dialog { kind, message, .. } => {
                if snapshot.dialog.is_none() {
                    snapshot.dialog = Some(DialogInfo {
                        kind: *kind,
                        message: message.clone(),
                    });
                }
            }
            SignalPayload::Download { path, .. } => {
                if !snapshot.downloads.contains(path) {
                    snapshot.downloads.push(path.clone());
                }
            }
            SignalPayload::Crash { .. }
            | SignalPayload::NavigationTimeout { .. }
            | SignalPayload::SessionClosed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisories_extend_the_snapshot_once() {
        let mut snapshot = BrowserSnapshot::new("https://example.com");
        let tab = WatchdogSignal::advisory(
            "popup",
            SignalPayload::NewTab {
                page: PageId::from("p2"),
                url: "https://ads.example.com".into(),
                opener: None,
            },
            1,
        );
        tab.merge_into(&mut snapshot);
        tab.merge_into(&mut snapshot);
        assert_eq!(snapshot.tabs.len(), 1);

        let download = WatchdogSignal::advisory(
            "download",
            SignalPayload::Download {
                url: "https://example.com/report.pdf".into(),
                path: "/tmp/report.pdf".into(),
            },
            1,
        );
        download.merge_into(&mut snapshot);
        assert_eq!(snapshot.downloads, vec!["/tmp/report.pdf".to_string()]);
        assert_eq!(download.category(), SignalCategory::Download);
    }

    #[test]
    fn payload_serializes_with_category_tag() {
        let signal = WatchdogSignal::fatal(
            "crash",
            SignalPayload::Crash {
                page: PageId::from("p1"),
                reason: "oom".into(),
            },
            4,
        );
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["payload"]["category"], "crash");
        assert_eq!(value["severity"], "fatal");
        assert!(signal.describe().contains("oom"));
    }
}
