use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named action with concrete arguments, as proposed by the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    #[serde(alias = "action")]
    pub name: String,
    #[serde(default = "empty_args", alias = "params")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Action without arguments.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, empty_args())
    }

    /// Accepts both `{"name": "click", "args": {..}}` and the compact
    /// single-key form `{"click": {..}}` that models tend to emit.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if let Value::Object(map) = &value {
            if map.len() == 1 && !map.contains_key("name") && !map.contains_key("action") {
                if let Some((name, args)) = map.iter().next() {
                    let args = if args.is_null() {
                        empty_args()
                    } else {
                        args.clone()
                    };
                    return Ok(Self::new(name.clone(), args));
                }
            }
        }
        serde_json::from_value(value)
    }
}

/// Outcome of executing one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// Terminal flag: the task is considered finished.
    #[serde(default)]
    pub is_done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the content should be carried into the engine's history summary.
    #[serde(default)]
    pub include_in_memory: bool,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            include_in_memory: true,
            ..Self::default()
        }
    }

    /// Terminal result produced by the `done` action.
    pub fn done(text: impl Into<String>, success: bool) -> Self {
        Self {
            success,
            is_done: true,
            extracted_content: Some(text.into()),
            error: None,
            include_in_memory: true,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.extracted_content = Some(content.into());
        self
    }

    pub fn remember(mut self) -> Self {
        self.include_in_memory = true;
        self
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }

    /// True when batch execution must stop after this result.
    pub fn stops_batch(&self) -> bool {
        !self.success || self.is_done
    }
}

/// Catalog entry exposed to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_when: Option<String>,
}
