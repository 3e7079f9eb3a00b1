//! Built-in browser actions.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use webpilot_core_types::PageId;

use crate::errors::{ActionError, RegistryError};
use crate::filter::DomainFilter;
use crate::model::ActionResult;
use crate::ports::ActionContext;
use crate::registry::ActionRegistry;

const MAX_WAIT_SECONDS: u64 = 20;

/// Actions without arguments.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NavigateParams {
    /// Absolute URL to open.
    pub url: String,
    /// Open in a new tab instead of the current one.
    #[serde(default)]
    pub new_tab: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClickParams {
    /// Index of the interactive element.
    pub index: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypeTextParams {
    pub index: u32,
    pub text: String,
    /// Clear the field before typing.
    #[serde(default = "default_true")]
    pub clear: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SendKeysParams {
    /// Key chord such as `Enter` or `Control+a`.
    pub keys: String,
}

fn default_pages() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScrollParams {
    #[serde(default = "default_true")]
    pub down: bool,
    /// Number of viewport heights.
    #[serde(default = "default_pages")]
    pub pages: f32,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractParams {
    /// What to extract from the page.
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TabParams {
    pub page_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UploadParams {
    pub index: u32,
    /// Local path of the file to upload.
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AcceptDialogParams {
    /// Text for prompt dialogs.
    #[serde(default)]
    pub prompt_text: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    pub seconds: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DoneParams {
    /// Final answer or summary for the user.
    pub text: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

async fn navigate(ctx: ActionContext, params: NavigateParams) -> Result<ActionResult, ActionError> {
    if params.url.trim().is_empty() {
        return Err(ActionError::InvalidArgument("url cannot be empty".into()));
    }
    ctx.browser()
        .navigate(ctx.frame(), &params.url, params.new_tab)
        .await?;
    let verb = if params.new_tab { "Opened new tab with" } else { "Navigated to" };
    Ok(ActionResult::success()
        .with_content(format!("{verb} {}", params.url))
        .remember())
}

async fn click(ctx: ActionContext, params: ClickParams) -> Result<ActionResult, ActionError> {
    ctx.browser().click(ctx.frame(), params.index).await?;
    let label = ctx
        .snapshot()
        .element(params.index)
        .map(|el| format!(" ({})", el.text))
        .unwrap_or_default();
    Ok(ActionResult::success()
        .with_content(format!("Clicked element {}{label}", params.index))
        .remember())
}

async fn type_text(ctx: ActionContext, params: TypeTextParams) -> Result<ActionResult, ActionError> {
    ctx.browser()
        .type_text(ctx.frame(), params.index, &params.text, params.clear)
        .await?;
    Ok(ActionResult::success()
        .with_content(format!("Typed into element {}", params.index))
        .remember())
}

async fn send_keys(ctx: ActionContext, params: SendKeysParams) -> Result<ActionResult, ActionError> {
    ctx.browser().send_keys(ctx.frame(), &params.keys).await?;
    Ok(ActionResult::success().with_content(format!("Sent keys {}", params.keys)))
}

async fn scroll(ctx: ActionContext, params: ScrollParams) -> Result<ActionResult, ActionError> {
    if !(params.pages.is_finite() && params.pages > 0.0) {
        return Err(ActionError::InvalidArgument("pages must be positive".into()));
    }
    ctx.browser()
        .scroll(ctx.frame(), params.down, params.pages)
        .await?;
    let direction = if params.down { "down" } else { "up" };
    Ok(ActionResult::success().with_content(format!("Scrolled {direction} {} page(s)", params.pages)))
}

async fn go_back(ctx: ActionContext, _params: NoParams) -> Result<ActionResult, ActionError> {
    ctx.browser().go_back(ctx.frame()).await?;
    Ok(ActionResult::success().with_content("Navigated back"))
}

async fn extract_content(ctx: ActionContext, params: ExtractParams) -> Result<ActionResult, ActionError> {
    let text = ctx.browser().extract_text(ctx.frame(), &params.query).await?;
    Ok(ActionResult::success().with_content(text).remember())
}

async fn switch_tab(ctx: ActionContext, params: TabParams) -> Result<ActionResult, ActionError> {
    let page = PageId(params.page_id);
    ctx.browser().switch_tab(&page).await?;
    Ok(ActionResult::success().with_content(format!("Switched to tab {page}")))
}

async fn close_tab(ctx: ActionContext, params: TabParams) -> Result<ActionResult, ActionError> {
    let page = PageId(params.page_id);
    ctx.browser().close_tab(&page).await?;
    Ok(ActionResult::success().with_content(format!("Closed tab {page}")))
}

async fn upload_file(ctx: ActionContext, params: UploadParams) -> Result<ActionResult, ActionError> {
    ctx.browser()
        .upload_file(ctx.frame(), params.index, &params.path)
        .await?;
    Ok(ActionResult::success()
        .with_content(format!("Uploaded {}", params.path))
        .remember())
}

async fn accept_dialog(ctx: ActionContext, params: AcceptDialogParams) -> Result<ActionResult, ActionError> {
    ctx.browser()
        .handle_dialog(true, params.prompt_text.as_deref())
        .await?;
    Ok(ActionResult::success().with_content("Accepted dialog"))
}

async fn dismiss_dialog(ctx: ActionContext, _params: NoParams) -> Result<ActionResult, ActionError> {
    ctx.browser().handle_dialog(false, None).await?;
    Ok(ActionResult::success().with_content("Dismissed dialog"))
}

async fn wait(_ctx: ActionContext, params: WaitParams) -> Result<ActionResult, ActionError> {
    let seconds = params.seconds.min(MAX_WAIT_SECONDS);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    Ok(ActionResult::success().with_content(format!("Waited {seconds}s")))
}

async fn done(_ctx: ActionContext, params: DoneParams) -> Result<ActionResult, ActionError> {
    Ok(ActionResult::done(params.text, params.success))
}

/// Register the standard browser action set.
pub fn register_browser_actions(registry: &mut ActionRegistry) -> Result<(), RegistryError> {
    registry.register_action("navigate", "Open a URL in the current or a new tab", DomainFilter::Always, navigate)?;
    registry.register_action("click", "Click an interactive element by index", DomainFilter::Always, click)?;
    registry.register_action("type_text", "Type text into an input element", DomainFilter::Always, type_text)?;
    registry.register_action("send_keys", "Send keyboard keys to the page", DomainFilter::Always, send_keys)?;
    registry.register_action("scroll", "Scroll the page", DomainFilter::Always, scroll)?;
    registry.register_action("go_back", "Navigate back in history", DomainFilter::Always, go_back)?;
    registry.register_action(
        "extract_content",
        "Extract information from the current page",
        DomainFilter::Always,
        extract_content,
    )?;
    registry.register_action("switch_tab", "Focus another tab", DomainFilter::Always, switch_tab)?;
    registry.register_action("close_tab", "Close a tab", DomainFilter::Always, close_tab)?;
    registry.register_action(
        "upload_file",
        "Choose a file in the open file picker",
        DomainFilter::FilePickerOpen,
        upload_file,
    )?;
    registry.register_action("accept_dialog", "Accept the open native dialog", DomainFilter::DialogOpen, accept_dialog)?;
    registry.register_action("dismiss_dialog", "Dismiss the open native dialog", DomainFilter::DialogOpen, dismiss_dialog)?;
    registry.register_action("wait", "Wait a number of seconds (max 20)", DomainFilter::Always, wait)?;
    registry.register_action("done", "Finish the task with a final answer", DomainFilter::Always, done)?;
    Ok(())
}
