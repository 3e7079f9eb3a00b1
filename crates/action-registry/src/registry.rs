use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use webpilot_core_types::BrowserSnapshot;

use crate::errors::{ActionError, BatchRejection, RegistryError};
use crate::filter::DomainFilter;
use crate::metrics;
use crate::model::{ActionCall, ActionResult, ActionSpec};
use crate::ports::{ActionContext, BrowserPort};

/// Handler invoked for a validated call.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, ctx: ActionContext, args: Value) -> Result<ActionResult, ActionError>;
}

/// Adapts an async function taking typed parameters into an [`ActionHandler`].
pub struct FnHandler<P, F> {
    func: F,
    _params: PhantomData<fn() -> P>,
}

impl<P, F> FnHandler<P, F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            _params: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> ActionHandler for FnHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(ActionContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
{
    async fn call(&self, ctx: ActionContext, args: Value) -> Result<ActionResult, ActionError> {
        let params: P = serde_json::from_value(args)
            .map_err(|err| ActionError::InvalidArgument(err.to_string()))?;
        (self.func)(ctx, params).await
    }
}

struct RegistryEntry {
    name: String,
    description: String,
    schema: Value,
    validator: jsonschema::Validator,
    handler: Arc<dyn ActionHandler>,
    filter: DomainFilter,
}

impl RegistryEntry {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.clone(),
            available_when: self.filter.describe(),
        }
    }
}

/// Per-dispatch environment access.
#[derive(Clone)]
pub struct DispatchContext {
    pub browser: Arc<dyn BrowserPort>,
    pub snapshot: Arc<BrowserSnapshot>,
    pub timeout: Duration,
}

impl DispatchContext {
    pub fn new(browser: Arc<dyn BrowserPort>, snapshot: Arc<BrowserSnapshot>, timeout: Duration) -> Self {
        Self {
            browser,
            snapshot,
            timeout,
        }
    }
}

/// Catalog of actions, built once and immutable afterwards.
///
/// Entries keep registration order; the specification handed to the
/// reasoning engine is produced from the same entries dispatch uses.
#[derive(Default)]
pub struct ActionRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in browser actions.
    pub fn with_browser_actions() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::builtin::register_browser_actions(&mut registry)?;
        Ok(registry)
    }

    /// Register an entry with an explicit JSON schema.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: Arc<dyn ActionHandler>,
        filter: DomainFilter,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let validator =
            jsonschema::validator_for(&schema).map_err(|err| RegistryError::InvalidSchema {
                action: name.clone(),
                details: err.to_string(),
            })?;
        debug!(action = %name, "registered action");
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(RegistryEntry {
            name,
            description: description.into(),
            schema,
            validator,
            handler,
            filter,
        });
        metrics::set_registered_count(self.entries.len());
        Ok(())
    }

    /// Register a typed handler; the schema is derived from `P`.
    pub fn register_action<P, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        filter: DomainFilter,
        func: F,
    ) -> Result<(), RegistryError>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(ActionContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
    {
        let name = name.into();
        let schema = serde_json::to_value(schemars::schema_for!(P)).map_err(|err| {
            RegistryError::InvalidSchema {
                action: name.clone(),
                details: err.to_string(),
            }
        })?;
        let handler: Arc<dyn ActionHandler> = Arc::new(FnHandler::<P, F>::new(func));
        self.register(name, description, schema, handler, filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Full catalog, in registration order.
    pub fn specification(&self) -> Vec<ActionSpec> {
        self.entries.iter().map(RegistryEntry::spec).collect()
    }

    /// Catalog restricted to actions whose filter admits the snapshot.
    pub fn specification_for(&self, snapshot: &BrowserSnapshot) -> Vec<ActionSpec> {
        self.entries
            .iter()
            .filter(|entry| entry.filter.admits(snapshot))
            .map(RegistryEntry::spec)
            .collect()
    }

    /// Text rendering of the catalog for prompts.
    pub fn prompt_description(&self, snapshot: Option<&BrowserSnapshot>) -> String {
        let specs = match snapshot {
            Some(snapshot) => self.specification_for(snapshot),
            None => self.specification(),
        };
        specs
            .iter()
            .map(|spec| {
                let params = spec
                    .parameters
                    .get("properties")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "{}".to_string());
                match &spec.available_when {
                    Some(when) => format!("- {}: {} {} ({})", spec.name, spec.description, params, when),
                    None => format!("- {}: {} {}", spec.name, spec.description, params),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn resolve(&self, call: &ActionCall, snapshot: &BrowserSnapshot) -> Result<&RegistryEntry, RegistryError> {
        let entry = self
            .index
            .get(&call.name)
            .map(|idx| &self.entries[*idx])
            .ok_or_else(|| RegistryError::UnknownAction(call.name.clone()))?;

        let violations: Vec<String> = entry
            .validator
            .iter_errors(&call.args)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        if !violations.is_empty() {
            return Err(RegistryError::SchemaValidation {
                action: call.name.clone(),
                details: violations.join("; "),
            });
        }

        if !entry.filter.admits(snapshot) {
            return Err(RegistryError::NotApplicable {
                action: call.name.clone(),
                reason: entry
                    .filter
                    .describe()
                    .unwrap_or_else(|| "filter rejected current state".to_string()),
            });
        }
        Ok(entry)
    }

    /// Lookup, schema and filter checks without touching the browser.
    pub fn validate(&self, call: &ActionCall, snapshot: &BrowserSnapshot) -> Result<(), RegistryError> {
        self.resolve(call, snapshot).map(|_| ()).map_err(|err| {
            metrics::record_rejection(err.kind());
            err
        })
    }

    /// Validate an entire batch; reports the first offending action.
    pub fn validate_batch(&self, calls: &[ActionCall], snapshot: &BrowserSnapshot) -> Result<(), BatchRejection> {
        for (index, call) in calls.iter().enumerate() {
            self.validate(call, snapshot)
                .map_err(|error| BatchRejection { index, error })?;
        }
        Ok(())
    }

    /// Validate and run one action.
    ///
    /// Registry errors are returned before anything reaches the browser.
    /// Handler errors, timeouts and panics come back as a failed
    /// [`ActionResult`].
    #[instrument(skip_all, fields(action = %call.name))]
    pub async fn dispatch(&self, call: &ActionCall, cx: &DispatchContext) -> Result<ActionResult, RegistryError> {
        let entry = match self.resolve(call, &cx.snapshot) {
            Ok(entry) => entry,
            Err(err) => {
                metrics::record_rejection(err.kind());
                warn!(error = %err, "action rejected");
                return Err(err);
            }
        };

        let handler = Arc::clone(&entry.handler);
        let browser = Arc::clone(&cx.browser);
        let snapshot = Arc::clone(&cx.snapshot);
        let args = call.args.clone();
        let invocation = async move {
            let frame = match browser.acquire_frame().await {
                Ok(frame) => frame,
                Err(err) => return Err(ActionError::from(err)),
            };
            let ctx = ActionContext::new(browser, frame, snapshot);
            handler.call(ctx, args).await
        };

        let (result, outcome) =
            match tokio::time::timeout(cx.timeout, AssertUnwindSafe(invocation).catch_unwind()).await {
                Ok(Ok(Ok(result))) => {
                    let outcome = if result.success { "success" } else { "failure" };
                    (result, outcome)
                }
                Ok(Ok(Err(err))) => (ActionResult::failure(format!("{}: {err}", call.name)), "error"),
                Ok(Err(panic)) => (
                    ActionResult::failure(format!(
                        "{} panicked: {}",
                        call.name,
                        panic_message(panic.as_ref())
                    )),
                    "panic",
                ),
                Err(_) => (
                    ActionResult::failure(format!(
                        "{} timed out after {}ms",
                        call.name,
                        cx.timeout.as_millis()
                    )),
                    "timeout",
                ),
            };

        metrics::record_dispatch(&call.name, outcome);
        if result.success {
            debug!(outcome, "action finished");
        } else {
            warn!(outcome, error = ?result.error, "action failed");
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
