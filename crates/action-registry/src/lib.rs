//! Action Registry.
//!
//! The single authority on which actions exist, what arguments they take and
//! how they reach the browser. The catalog exposed to the reasoning engine is
//! derived from the same entries that dispatch, so the two cannot drift.

pub mod builtin;
pub mod errors;
pub mod filter;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod registry;

pub use builtin::register_browser_actions;
pub use errors::{ActionError, BatchRejection, RegistryError};
pub use filter::DomainFilter;
pub use model::{ActionCall, ActionResult, ActionSpec};
pub use ports::{ActionContext, BrowserPort, FrameLease};
pub use registry::{ActionHandler, ActionRegistry, DispatchContext, FnHandler};
