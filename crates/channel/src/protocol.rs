//! Call/response types and their line-frame encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// One named function call requested by the agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Opaque correlation id, echoed back on the response.
    pub id: String,
    pub name: String,
    /// Raw arguments. Decoded per capability at dispatch time.
    #[serde(default)]
    pub args: Value,
}

impl Call {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// The calls delivered together in one inbound turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub calls: Vec<Call>,
}

impl Batch {
    pub fn new(calls: Vec<Call>) -> Self {
        Self { calls }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl FromIterator<Call> for Batch {
    fn from_iter<I: IntoIterator<Item = Call>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Terminal result of executing one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { data: Value },
    Failure { message: String },
}

impl Outcome {
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Success payload, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Outcome::Success { data } => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    /// Failure message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { message } => Some(message),
        }
    }
}

/// Response to a single call, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub name: String,
    #[serde(rename = "response")]
    pub outcome: Outcome,
}

impl Response {
    pub fn new(id: impl Into<String>, name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome,
        }
    }
}

// --- line frames ---

/// Inbound frame. Only `toolCall` frames carry work; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(default)]
    pub tool_call: Option<ToolCallFrame>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    #[serde(default)]
    pub function_calls: Vec<Call>,
}

/// Outbound frame carrying the responses for one batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub tool_response: ToolResponseFrame,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseFrame {
    pub function_responses: Vec<Response>,
}

/// Maximum accepted inbound frame (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Decode one line. `Ok(None)` means the frame carries no calls.
pub fn decode_line(line: &str) -> Result<Option<Batch>> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let frame: InboundFrame =
        serde_json::from_str(line).map_err(|e| Error::InvalidFrame(e.to_string()))?;
    Ok(frame
        .tool_call
        .map(|tc| Batch::new(tc.function_calls)))
}

/// Encode a batch of responses as a single line (no trailing newline).
pub fn encode_responses(responses: Vec<Response>) -> Result<String> {
    let frame = OutboundFrame {
        tool_response: ToolResponseFrame {
            function_responses: responses,
        },
    };
    Ok(serde_json::to_string(&frame)?)
}
