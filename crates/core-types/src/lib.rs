//! Shared primitives for the WebPilot agent runtime.
//!
//! Identifiers, the common error stub, the environment event feed and the
//! observable browser state live here so that the registry, the watchdogs and
//! the agent loop agree on one vocabulary.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub mod event;
pub mod snapshot;

pub use event::BrowserEvent;
pub use snapshot::{BrowserSnapshot, DialogInfo, DialogKind, InteractiveElement, TabInfo};

/// Shared error type for crates that only need a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PilotError {
    #[error("{message}")]
    Message { message: String },
}

impl PilotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SessionId);
string_id!(PageId);
string_id!(FrameId);
string_id!(ActionId);
string_id!(TaskId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(PageId::new(), PageId::new());
        assert_eq!(TaskId::from("task-1").to_string(), "task-1");
    }

    #[test]
    fn error_displays_message() {
        let err = PilotError::new("target closed");
        assert_eq!(err.to_string(), "target closed");
    }
}
