use std::fmt;

use thiserror::Error;
use webpilot_core_types::PilotError;

/// Failures raised by the registry before a handler runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action `{0}` is already registered")]
    DuplicateName(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("invalid arguments for `{action}`: {details}")]
    SchemaValidation { action: String, details: String },
    #[error("action `{action}` is not applicable: {reason}")]
    NotApplicable { action: String, reason: String },
    #[error("invalid schema for `{action}`: {details}")]
    InvalidSchema { action: String, details: String },
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::DuplicateName(_) => "duplicate_name",
            RegistryError::UnknownAction(_) => "unknown_action",
            RegistryError::SchemaValidation { .. } => "schema_validation",
            RegistryError::NotApplicable { .. } => "not_applicable",
            RegistryError::InvalidSchema { .. } => "invalid_schema",
        }
    }
}

/// First offending action of a proposed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRejection {
    pub index: usize,
    pub error: RegistryError,
}

impl fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action #{} rejected: {}", self.index + 1, self.error)
    }
}

impl std::error::Error for BatchRejection {}

/// Failures raised inside an action handler.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("browser error: {0}")]
    Browser(#[from] PilotError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
