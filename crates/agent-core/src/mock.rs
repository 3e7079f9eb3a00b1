//! In-memory browser used by tests and the offline CLI.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use action_registry::BrowserPort;
use async_trait::async_trait;
use parking_lot::Mutex;
use webpilot_core_types::{
    BrowserEvent, BrowserSnapshot, DialogInfo, DialogKind, FrameId, InteractiveElement, PageId,
    PilotError, TabInfo,
};
use webpilot_event_bus::InMemoryBus;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct MockPage {
    id: PageId,
    url: String,
    title: Option<String>,
    back: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    active: usize,
    pages: Vec<MockPage>,
    elements: Vec<InteractiveElement>,
    dialog: Option<DialogInfo>,
    downloads: Vec<String>,
    page_text: Option<String>,
    failures: HashMap<String, VecDeque<String>>,
    triggers: HashMap<String, VecDeque<BrowserEvent>>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
    next_page: u32,
    next_frame: u32,
    outstanding: HashSet<FrameId>,
}

impl MockState {
    fn page(&self) -> Option<&MockPage> {
        self.pages.get(self.active)
    }

    fn page_mut(&mut self) -> Result<&mut MockPage, PilotError> {
        let active = self.active;
        self.pages
            .get_mut(active)
            .ok_or_else(|| PilotError::new("no open tab"))
    }

    fn new_page_id(&mut self) -> PageId {
        self.next_page += 1;
        PageId(format!("page-{}", self.next_page))
    }

    fn apply(&mut self, event: &BrowserEvent) {
        match event {
            BrowserEvent::TargetCreated { page, url, .. } => {
                if !self.pages.iter().any(|p| &p.id == page) {
                    self.pages.push(MockPage {
                        id: page.clone(),
                        url: url.clone(),
                        title: None,
                        back: Vec::new(),
                    });
                }
            }
            BrowserEvent::TargetClosed { page } => {
                self.pages.retain(|p| &p.id != page);
                if self.active >= self.pages.len() {
                    self.active = 0;
                }
            }
            BrowserEvent::DialogOpened { kind, message, .. } => {
                self.dialog = Some(DialogInfo {
                    kind: *kind,
                    message: message.clone(),
                });
            }
            BrowserEvent::DialogClosed { .. } => self.dialog = None,
            BrowserEvent::DownloadCompleted { path, .. } => {
                if !self.downloads.contains(path) {
                    self.downloads.push(path.clone());
                }
            }
            _ => {}
        }
    }
}

/// Scriptable [`BrowserPort`] that publishes its events on an in-memory bus.
///
/// Failures, latency and out-of-band events can be queued per operation
/// (`"navigate"`, `"click"`, `"snapshot"`, ...); each queued entry is
/// consumed by the next call of that operation.
pub struct MockBrowser {
    state: Mutex<MockState>,
    bus: Arc<InMemoryBus<BrowserEvent>>,
}

impl MockBrowser {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Self::with_bus(url, InMemoryBus::new(EVENT_CAPACITY))
    }

    pub fn with_bus(url: impl Into<String>, bus: Arc<InMemoryBus<BrowserEvent>>) -> Arc<Self> {
        let mut state = MockState::default();
        let id = state.new_page_id();
        state.pages.push(MockPage {
            id,
            url: url.into(),
            title: None,
            back: Vec::new(),
        });
        Arc::new(Self {
            state: Mutex::new(state),
            bus,
        })
    }

    /// Event feed of the session, for the watchdog supervisor.
    pub fn bus(&self) -> Arc<InMemoryBus<BrowserEvent>> {
        Arc::clone(&self.bus)
    }

    pub fn set_elements(&self, elements: Vec<InteractiveElement>) {
        self.state.lock().elements = elements;
    }

    /// Add an interactive element and return its index.
    pub fn add_element(&self, tag: impl Into<String>, text: impl Into<String>) -> u32 {
        let mut state = self.state.lock();
        let index = state.elements.iter().map(|el| el.index + 1).max().unwrap_or(0);
        state.elements.push(InteractiveElement {
            index,
            tag: tag.into(),
            text: text.into(),
        });
        index
    }

    pub fn set_title(&self, title: impl Into<String>) {
        if let Ok(page) = self.state.lock().page_mut() {
            page.title = Some(title.into());
        }
    }

    /// Text returned by content extraction.
    pub fn set_page_text(&self, text: impl Into<String>) {
        self.state.lock().page_text = Some(text.into());
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: &str, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(message.into());
    }

    /// Publish `event` while the next call of `op` runs.
    pub fn emit_on(&self, op: &str, event: BrowserEvent) {
        self.state
            .lock()
            .triggers
            .entry(op.to_string())
            .or_default()
            .push_back(event);
    }

    /// Every call of `op` takes at least `latency`.
    pub fn delay(&self, op: &str, latency: Duration) {
        self.state.lock().delays.insert(op.to_string(), latency);
    }

    /// Publish an event now.
    pub fn emit(&self, event: BrowserEvent) {
        self.state.lock().apply(&event);
        self.bus.emit(event);
    }

    /// Operations performed so far, e.g. `click(3)`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn frames_acquired(&self) -> u32 {
        self.state.lock().next_frame
    }

    pub fn outstanding_frames(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    async fn begin(&self, op: &str, call: Option<String>) -> Result<(), PilotError> {
        let (delay, event, failure) = {
            let mut state = self.state.lock();
            if let Some(call) = call {
                state.calls.push(call);
            }
            let delay = state.delays.get(op).copied();
            let event = state.triggers.get_mut(op).and_then(VecDeque::pop_front);
            let failure = state.failures.get_mut(op).and_then(VecDeque::pop_front);
            (delay, event, failure)
        };
        if let Some(event) = event {
            self.emit(event);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(PilotError::new(message)),
            None => Ok(()),
        }
    }

    fn require_element(&self, index: u32) -> Result<(), PilotError> {
        let state = self.state.lock();
        if state.elements.iter().any(|el| el.index == index) {
            Ok(())
        } else {
            Err(PilotError::new(format!("element {index} not found")))
        }
    }
}

#[async_trait]
impl BrowserPort for MockBrowser {
    async fn snapshot(&self) -> Result<BrowserSnapshot, PilotError> {
        self.begin("snapshot", None).await?;
        let state = self.state.lock();
        let page = state.page();
        Ok(BrowserSnapshot {
            url: page.map(|p| p.url.clone()).unwrap_or_default(),
            title: page.and_then(|p| p.title.clone()),
            active_page: page.map(|p| p.id.clone()),
            tabs: state
                .pages
                .iter()
                .map(|p| TabInfo {
                    page: p.id.clone(),
                    url: p.url.clone(),
                    title: p.title.clone(),
                })
                .collect(),
            elements: state.elements.clone(),
            dialog: state.dialog.clone(),
            downloads: state.downloads.clone(),
        })
    }

    async fn acquire_frame(&self) -> Result<FrameId, PilotError> {
        self.begin("acquire_frame", None).await?;
        let mut state = self.state.lock();
        state.next_frame += 1;
        let frame = FrameId(format!("frame-{}", state.next_frame));
        state.outstanding.insert(frame.clone());
        Ok(frame)
    }

    fn release_frame(&self, frame: &FrameId) {
        self.state.lock().outstanding.remove(frame);
    }

    async fn navigate(&self, _frame: &FrameId, url: &str, new_tab: bool) -> Result<(), PilotError> {
        self.begin("navigate", Some(format!("navigate({url})"))).await?;
        if !url.contains("://") {
            return Err(PilotError::new(format!("invalid url `{url}`")));
        }
        let page = if new_tab {
            let id = {
                let mut state = self.state.lock();
                let id = state.new_page_id();
                state.active = state.pages.len();
                id
            };
            self.emit(BrowserEvent::TargetCreated {
                page: id.clone(),
                url: url.to_string(),
                opener: None,
                by_agent: true,
            });
            id
        } else {
            let mut state = self.state.lock();
            let page = state.page_mut()?;
            let previous = std::mem::replace(&mut page.url, url.to_string());
            page.back.push(previous);
            page.title = None;
            page.id.clone()
        };
        self.bus.emit(BrowserEvent::NavigationFinished {
            page,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn click(&self, _frame: &FrameId, index: u32) -> Result<(), PilotError> {
        self.begin("click", Some(format!("click({index})"))).await?;
        self.require_element(index)
    }

    async fn type_text(&self, _frame: &FrameId, index: u32, text: &str, _clear: bool) -> Result<(), PilotError> {
        self.begin("type_text", Some(format!("type_text({index}, {text})"))).await?;
        self.require_element(index)
    }

    async fn send_keys(&self, _frame: &FrameId, keys: &str) -> Result<(), PilotError> {
        self.begin("send_keys", Some(format!("send_keys({keys})"))).await
    }

    async fn scroll(&self, _frame: &FrameId, down: bool, pages: f32) -> Result<(), PilotError> {
        let direction = if down { "down" } else { "up" };
        self.begin("scroll", Some(format!("scroll({direction}, {pages})"))).await
    }

    async fn go_back(&self, _frame: &FrameId) -> Result<(), PilotError> {
        self.begin("go_back", Some("go_back".to_string())).await?;
        let mut state = self.state.lock();
        let page = state.page_mut()?;
        match page.back.pop() {
            Some(url) => {
                page.url = url;
                Ok(())
            }
            None => Err(PilotError::new("no previous page")),
        }
    }

    async fn extract_text(&self, _frame: &FrameId, query: &str) -> Result<String, PilotError> {
        self.begin("extract_text", Some(format!("extract_text({query})"))).await?;
        let state = self.state.lock();
        Ok(state
            .page_text
            .clone()
            .or_else(|| state.page().and_then(|p| p.title.clone()))
            .unwrap_or_default())
    }

    async fn switch_tab(&self, page: &PageId) -> Result<(), PilotError> {
        self.begin("switch_tab", Some(format!("switch_tab({page})"))).await?;
        let mut state = self.state.lock();
        match state.pages.iter().position(|p| &p.id == page) {
            Some(index) => {
                state.active = index;
                Ok(())
            }
            None => Err(PilotError::new(format!("unknown tab {page}"))),
        }
    }

    async fn close_tab(&self, page: &PageId) -> Result<(), PilotError> {
        self.begin("close_tab", Some(format!("close_tab({page})"))).await?;
        if !self.state.lock().pages.iter().any(|p| &p.id == page) {
            return Err(PilotError::new(format!("unknown tab {page}")));
        }
        self.emit(BrowserEvent::TargetClosed { page: page.clone() });
        Ok(())
    }

    async fn upload_file(&self, _frame: &FrameId, index: u32, path: &str) -> Result<(), PilotError> {
        self.begin("upload_file", Some(format!("upload_file({index}, {path})"))).await?;
        let mut state = self.state.lock();
        match &state.dialog {
            Some(DialogInfo {
                kind: DialogKind::FilePicker,
                ..
            }) => {
                state.dialog = None;
                Ok(())
            }
            _ => Err(PilotError::new("no file picker open")),
        }
    }

    async fn handle_dialog(&self, accept: bool, _prompt_text: Option<&str>) -> Result<(), PilotError> {
        self.begin("handle_dialog", Some(format!("handle_dialog({accept})"))).await?;
        let page = {
            let state = self.state.lock();
            if state.dialog.is_none() {
                return Err(PilotError::new("no dialog open"));
            }
            state.page().map(|p| p.id.clone()).unwrap_or_default()
        };
        self.emit(BrowserEvent::DialogClosed { page });
        Ok(())
    }
}

impl std::fmt::Debug for MockBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockBrowser")
            .field("url", &state.page().map(|p| p.url.as_str()))
            .field("tabs", &state.pages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;
    use webpilot_event_bus::EventBus;

    #[tokio::test]
    async fn navigation_updates_snapshot_and_history() {
        let browser = MockBrowser::new("https://example.com");
        let frame = browser.acquire_frame().await.unwrap();
        browser
            .navigate(&frame, "https://example.com/docs", false)
            .await
            .unwrap();
        assert_eq!(browser.snapshot().await.unwrap().url, "https://example.com/docs");
        browser.go_back(&frame).await.unwrap();
        assert_eq!(browser.snapshot().await.unwrap().url, "https://example.com");
        browser.release_frame(&frame);
        assert_eq!(browser.outstanding_frames(), 0);
        assert_eq!(
            browser.calls(),
            vec!["navigate(https://example.com/docs)".to_string(), "go_back".to_string()]
        );
    }

    #[tokio::test]
    async fn queued_failures_and_events_fire_once() {
        let browser = MockBrowser::new("https://example.com");
        let mut events = browser.bus().subscribe();
        let index = browser.add_element("button", "Buy");
        browser.fail_next("click", "detached node");
        browser.emit_on(
            "click",
            BrowserEvent::DialogOpened {
                page: PageId::from("page-1"),
                kind: DialogKind::Confirm,
                message: "Sure?".into(),
            },
        );
        let frame = browser.acquire_frame().await.unwrap();
        assert!(browser.click(&frame, index).await.is_err());
        assert!(browser.click(&frame, index).await.is_ok());
        assert!(browser.click(&frame, 42).await.is_err());

        assert!(matches!(events.try_recv(), Ok(BrowserEvent::DialogOpened { .. })));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert!(browser.snapshot().await.unwrap().dialog_open());
        browser.handle_dialog(true, None).await.unwrap();
        assert!(!browser.snapshot().await.unwrap().dialog_open());
    }

    #[tokio::test]
    async fn new_tabs_are_marked_as_agent_opened() {
        let browser = MockBrowser::new("https://example.com");
        let mut events = browser.bus().subscribe();
        let frame = browser.acquire_frame().await.unwrap();
        browser
            .navigate(&frame, "https://example.org", true)
            .await
            .unwrap();
        match events.try_recv() {
            Ok(BrowserEvent::TargetCreated { by_agent, .. }) => assert!(by_agent),
            other => panic!("unexpected event {other:?}"),
        }
        let snapshot = browser.snapshot().await.unwrap();
        assert_eq!(snapshot.tabs.len(), 2);
        assert_eq!(snapshot.url, "https://example.org");
    }
}
