//! Event types for the dispatch journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a serving session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A call was received from the session.
    ToolCall {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The response sent back for a call.
    ToolResult {
        call_id: String,
        name: String,
        output: serde_json::Value,
    },
    /// Session started.
    SessionStart,
    /// Session ended.
    SessionEnd,
}

impl EventKind {
    /// Stable name stored alongside the event, used for filtering.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
        }
    }
}

/// An event in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(session_id: SessionId, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn tool_call(
        session_id: SessionId,
        call_id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            EventKind::ToolCall {
                call_id: call_id.into(),
                name: name.into(),
                input,
            },
        )
    }

    pub fn tool_result(
        session_id: SessionId,
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        Self::new(
            session_id,
            EventKind::ToolResult {
                call_id: call_id.into(),
                name: name.into(),
                output,
            },
        )
    }
}

/// One entry of the command execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// What was run, e.g. `cmd: dir`.
    pub command_label: String,
    /// Captured output, or the failure message.
    pub output: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandRecord {
    pub fn new(command_label: impl Into<String>, output: Option<String>) -> Self {
        Self {
            command_label: command_label.into(),
            output,
            timestamp: Utc::now(),
        }
    }
}
