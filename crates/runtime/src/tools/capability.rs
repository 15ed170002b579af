//! Capability trait.

use crate::tools::{Arguments, ToolError, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;

/// One invocable operation exposed to the agent.
///
/// This is the boundary between dispatch and side effects. Arguments have
/// already been checked against [`Capability::required_arguments`] when
/// `invoke` runs.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Declaration advertised to the session.
    fn spec(&self) -> &ToolSpec;

    /// Arguments that must be present (and non-null), in reporting order.
    fn required_arguments(&self) -> &'static [&'static str];

    /// Execute the call.
    async fn invoke(&self, args: Arguments) -> Result<Value, ToolError>;
}
