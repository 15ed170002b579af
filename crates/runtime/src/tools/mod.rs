//! Capabilities and their registry.

pub mod builtin;
mod capability;
pub mod errors;
mod registry;
mod types;

pub use capability::Capability;
pub use errors::{ErrorKind, ToolError};
pub use registry::{CapabilityEntry, Registry};
pub use types::{Arguments, ToolSpec, decode_arguments};
