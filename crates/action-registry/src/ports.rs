use std::sync::Arc;

use async_trait::async_trait;
use webpilot_core_types::{BrowserSnapshot, FrameId, PageId, PilotError};

fn unsupported(op: &str) -> PilotError {
    PilotError::new(format!("browser port does not support `{op}`"))
}

/// Environment session seen from the registry.
///
/// Primitive operations are only reached through registry handlers; the
/// agent loop itself calls nothing but [`BrowserPort::snapshot`].
#[async_trait]
pub trait BrowserPort: Send + Sync {
    async fn snapshot(&self) -> Result<BrowserSnapshot, PilotError>;

    /// Acquire a per-call frame handle. Released through [`FrameLease`].
    async fn acquire_frame(&self) -> Result<FrameId, PilotError>;

    fn release_frame(&self, frame: &FrameId);

    async fn navigate(&self, frame: &FrameId, url: &str, new_tab: bool) -> Result<(), PilotError> {
        let _ = (frame, url, new_tab);
        Err(unsupported("navigate"))
    }

    async fn click(&self, frame: &FrameId, index: u32) -> Result<(), PilotError> {
        let _ = (frame, index);
        Err(unsupported("click"))
    }

    async fn type_text(
        &self,
        frame: &FrameId,
        index: u32,
        text: &str,
        clear: bool,
    ) -> Result<(), PilotError> {
        let _ = (frame, index, text, clear);
        Err(unsupported("type_text"))
    }

    async fn send_keys(&self, frame: &FrameId, keys: &str) -> Result<(), PilotError> {
        let _ = (frame, keys);
        Err(unsupported("send_keys"))
    }

    async fn scroll(&self, frame: &FrameId, down: bool, pages: f32) -> Result<(), PilotError> {
        let _ = (frame, down, pages);
        Err(unsupported("scroll"))
    }

    async fn go_back(&self, frame: &FrameId) -> Result<(), PilotError> {
        let _ = frame;
        Err(unsupported("go_back"))
    }

    async fn extract_text(&self, frame: &FrameId, query: &str) -> Result<String, PilotError> {
        let _ = (frame, query);
        Err(unsupported("extract_text"))
    }

    async fn switch_tab(&self, page: &PageId) -> Result<(), PilotError> {
        let _ = page;
        Err(unsupported("switch_tab"))
    }

    async fn close_tab(&self, page: &PageId) -> Result<(), PilotError> {
        let _ = page;
        Err(unsupported("close_tab"))
    }

    async fn upload_file(&self, frame: &FrameId, index: u32, path: &str) -> Result<(), PilotError> {
        let _ = (frame, index, path);
        Err(unsupported("upload_file"))
    }

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<(), PilotError> {
        let _ = (accept, prompt_text);
        Err(unsupported("handle_dialog"))
    }
}

/// Scoped frame handle. The frame goes back to the browser when the lease is
/// dropped, whichever way the handler exits.
pub struct FrameLease {
    browser: Arc<dyn BrowserPort>,
    frame: FrameId,
}

impl FrameLease {
    pub fn new(browser: Arc<dyn BrowserPort>, frame: FrameId) -> Self {
        Self { browser, frame }
    }

    pub fn frame(&self) -> &FrameId {
        &self.frame
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.browser.release_frame(&self.frame);
    }
}

impl std::fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLease")
            .field("frame", &self.frame)
            .finish()
    }
}

/// Everything a handler may touch during one dispatch.
pub struct ActionContext {
    browser: Arc<dyn BrowserPort>,
    lease: FrameLease,
    snapshot: Arc<BrowserSnapshot>,
}

impl ActionContext {
    pub fn new(browser: Arc<dyn BrowserPort>, frame: FrameId, snapshot: Arc<BrowserSnapshot>) -> Self {
        let lease = FrameLease::new(Arc::clone(&browser), frame);
        Self {
            browser,
            lease,
            snapshot,
        }
    }

    pub fn browser(&self) -> &dyn BrowserPort {
        self.browser.as_ref()
    }

    pub fn frame(&self) -> &FrameId {
        self.lease.frame()
    }

    /// State observed at the start of the turn.
    pub fn snapshot(&self) -> &BrowserSnapshot {
        &self.snapshot
    }
}
