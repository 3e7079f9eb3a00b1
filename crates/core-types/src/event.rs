use crate::snapshot::DialogKind;
use crate::PageId;

/// Out-of-band notifications published by the browser session.
///
/// The event feed is read-only: consumers observe it, they never answer it.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(tag = "type", rename_all = "snake_case"))]
#[derive(Clone, Debug, PartialEq)]
pub enum BrowserEvent {
    /// A new tab/target appeared. `by_agent` is set when an action asked for it.
    TargetCreated {
        page: PageId,
        url: String,
        opener: Option<PageId>,
        by_agent: bool,
    },
    TargetCrashed {
        page: PageId,
        reason: String,
    },
    TargetClosed {
        page: PageId,
    },
    DialogOpened {
        page: PageId,
        kind: DialogKind,
        message: String,
    },
    DialogClosed {
        page: PageId,
    },
    DownloadStarted {
        url: String,
        suggested_name: Option<String>,
    },
    DownloadCompleted {
        url: String,
        path: String,
    },
    NavigationStarted {
        page: PageId,
        url: String,
    },
    NavigationFinished {
        page: PageId,
        url: String,
    },
    NavigationTimedOut {
        page: PageId,
        url: String,
        elapsed_ms: u64,
    },
    SessionClosed {
        reason: String,
    },
}

impl BrowserEvent {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BrowserEvent::TargetCreated { .. } => "target_created",
            BrowserEvent::TargetCrashed { .. } => "target_crashed",
            BrowserEvent::TargetClosed { .. } => "target_closed",
            BrowserEvent::DialogOpened { .. } => "dialog_opened",
            BrowserEvent::DialogClosed { .. } => "dialog_closed",
            BrowserEvent::DownloadStarted { .. } => "download_started",
            BrowserEvent::DownloadCompleted { .. } => "download_completed",
            BrowserEvent::NavigationStarted { .. } => "navigation_started",
            BrowserEvent::NavigationFinished { .. } => "navigation_finished",
            BrowserEvent::NavigationTimedOut { .. } => "navigation_timed_out",
            BrowserEvent::SessionClosed { .. } => "session_closed",
        }
    }
}
