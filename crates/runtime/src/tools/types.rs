//! Tool-related types.

use super::ToolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded argument bag of one call.
pub type Arguments = Map<String, Value>;

/// A function declaration advertised to the agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

/// Decode an argument bag into a capability's typed arguments.
pub fn decode_arguments<T: DeserializeOwned>(args: Arguments) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ToolError::InvalidInput(e.to_string()))
}
