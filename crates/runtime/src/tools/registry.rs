//! Fixed name → capability table.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::backend::{CommandExecutor, QueryExecutor, RenderSink};
use crate::tools::builtin::{ExecuteShellCommand, QueryDatabase, RenderAltair};
use crate::tools::{Arguments, Capability, ToolError, ToolSpec};

/// A registered capability.
#[derive(Clone)]
pub struct CapabilityEntry {
    name: String,
    handler: Arc<dyn Capability>,
}

impl CapabilityEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ToolSpec {
        self.handler.spec()
    }

    pub fn required_arguments(&self) -> &'static [&'static str] {
        self.handler.required_arguments()
    }

    /// Turn raw call arguments into an argument bag, failing on the first
    /// missing required field.
    pub fn check_arguments(&self, raw: Value) -> Result<Arguments, ToolError> {
        let args = match raw {
            Value::Null => Arguments::new(),
            Value::Object(map) => map,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "arguments must be an object, got {}",
                    json_type(&other)
                )));
            }
        };

        for field in self.required_arguments() {
            match args.get(*field) {
                None | Some(Value::Null) => {
                    return Err(ToolError::MissingArgument((*field).to_string()));
                }
                Some(_) => {}
            }
        }

        Ok(args)
    }

    pub async fn invoke(&self, args: Arguments) -> Result<Value, ToolError> {
        self.handler.invoke(args).await
    }
}

impl std::fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityEntry")
            .field("name", &self.name)
            .field("required", &self.required_arguments())
            .finish()
    }
}

/// Immutable set of capabilities, built once at startup.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, CapabilityEntry>,
    order: Vec<String>,
}

impl Registry {
    /// The standard set: `query_database`, `execute_shell_command`, `render_altair`.
    pub fn standard(
        queries: Arc<QueryExecutor>,
        commands: Arc<CommandExecutor>,
        charts: Arc<dyn RenderSink>,
    ) -> Self {
        let capabilities: Vec<Arc<dyn Capability>> = vec![
            Arc::new(QueryDatabase::new(queries)),
            Arc::new(ExecuteShellCommand::new(commands)),
            Arc::new(RenderAltair::new(charts)),
        ];
        Self::with_capabilities(capabilities)
    }

    /// Build a registry from an explicit capability list.
    ///
    /// Names must be unique; a duplicate is ignored with a warning.
    pub fn with_capabilities(capabilities: Vec<Arc<dyn Capability>>) -> Self {
        let mut registry = Self::default();
        for handler in capabilities {
            let name = handler.spec().name.clone();
            if registry.entries.contains_key(&name) {
                warn!(capability = %name, "duplicate capability ignored");
                continue;
            }
            registry.order.push(name.clone());
            registry
                .entries
                .insert(name.clone(), CapabilityEntry { name, handler });
        }
        registry
    }

    /// Look up a capability by call name.
    pub fn resolve(&self, name: &str) -> Option<&CapabilityEntry> {
        self.entries.get(name)
    }

    /// Declarations of every capability, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| entry.spec().clone())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
