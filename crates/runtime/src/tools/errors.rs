use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while dispatching or executing a call.
///
/// Every variant ends up as a `Failure` outcome for the call that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("Unknown function: {0}")]
    NotFound(String),
    #[error("missing required argument: {0}")]
    MissingArgument(String),
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("{0}")]
    Backend(String),
    #[error("command timed out after {0}ms")]
    Timeout(u64),
}

/// Coarse category of a [`ToolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownCapability,
    ArgumentError,
    ValidationRejected,
    BackendFault,
    TimeoutExceeded,
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::UnknownCapability,
            ToolError::MissingArgument(_) | ToolError::InvalidInput(_) => ErrorKind::ArgumentError,
            ToolError::Rejected(_) => ErrorKind::ValidationRejected,
            ToolError::Backend(_) => ErrorKind::BackendFault,
            ToolError::Timeout(_) => ErrorKind::TimeoutExceeded,
        }
    }
}
