//! The three capabilities exposed to the agent.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use policy::Operation;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::{CommandExecutor, CommandRequest, QueryExecutor, RenderSink, ShellKind};
use crate::tools::{Arguments, Capability, ToolError, ToolSpec, decode_arguments};

pub const QUERY_DATABASE: &str = "query_database";
pub const EXECUTE_SHELL_COMMAND: &str = "execute_shell_command";
pub const RENDER_ALTAIR: &str = "render_altair";

/// `query_database`: validated, parameterized SQL on the pool.
pub struct QueryDatabase {
    executor: Arc<QueryExecutor>,
    spec: ToolSpec,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    operation: Operation,
    #[serde(default)]
    params: Option<Vec<String>>,
}

impl QueryDatabase {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self {
            executor,
            spec: ToolSpec::new(
                QUERY_DATABASE,
                "Run a SQL query against the database. Use $1, $2, ... placeholders with `params`.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The SQL statement to run"
                        },
                        "operation": {
                            "type": "string",
                            "enum": ["select", "insert", "update", "delete"],
                            "description": "Kind of statement"
                        },
                        "params": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Positional parameters"
                        }
                    },
                    "required": ["query", "operation"]
                }),
            ),
        }
    }
}

#[async_trait]
impl Capability for QueryDatabase {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn required_arguments(&self) -> &'static [&'static str] {
        &["query", "operation"]
    }

    async fn invoke(&self, args: Arguments) -> Result<Value, ToolError> {
        let args: QueryArgs = decode_arguments(args)?;
        let params = args.params.unwrap_or_default();
        let result = self
            .executor
            .run(&args.query, args.operation, &params)
            .await?;
        serde_json::to_value(result).map_err(|e| ToolError::Backend(e.to_string()))
    }
}

/// `execute_shell_command`: one child process under a timeout.
pub struct ExecuteShellCommand {
    executor: Arc<CommandExecutor>,
    spec: ToolSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellArgs {
    shell: ShellKind,
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
}

impl ExecuteShellCommand {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self {
            executor,
            spec: ToolSpec::new(
                EXECUTE_SHELL_COMMAND,
                "Execute a command in the selected shell and capture its output.",
                json!({
                    "type": "object",
                    "properties": {
                        "shell": {
                            "type": "string",
                            "enum": ["cmd", "powershell", "gitbash"],
                            "description": "Shell to run the command in"
                        },
                        "command": {
                            "type": "string",
                            "description": "The command line to execute"
                        },
                        "workingDir": {
                            "type": "string",
                            "description": "Directory to run in (default: current directory)"
                        }
                    },
                    "required": ["shell", "command"]
                }),
            ),
        }
    }
}

#[async_trait]
impl Capability for ExecuteShellCommand {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn required_arguments(&self) -> &'static [&'static str] {
        &["shell", "command"]
    }

    async fn invoke(&self, args: Arguments) -> Result<Value, ToolError> {
        let args: ShellArgs = decode_arguments(args)?;
        let mut request = CommandRequest::new(args.shell, args.command);
        request.working_dir = args.working_dir.map(PathBuf::from);

        let output = self.executor.run(&request).await?;
        serde_json::to_value(output).map_err(|e| ToolError::Backend(e.to_string()))
    }
}

/// `render_altair`: hands a graph specification to the render sink.
pub struct RenderAltair {
    sink: Arc<dyn RenderSink>,
    spec: ToolSpec,
}

#[derive(Debug, Deserialize)]
struct RenderArgs {
    json_graph: String,
}

impl RenderAltair {
    pub fn new(sink: Arc<dyn RenderSink>) -> Self {
        Self {
            sink,
            spec: ToolSpec::new(
                RENDER_ALTAIR,
                "Display an Altair chart from its JSON specification.",
                json!({
                    "type": "object",
                    "properties": {
                        "json_graph": {
                            "type": "string",
                            "description": "JSON-encoded Altair/Vega-Lite graph specification"
                        }
                    },
                    "required": ["json_graph"]
                }),
            ),
        }
    }
}

#[async_trait]
impl Capability for RenderAltair {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn required_arguments(&self) -> &'static [&'static str] {
        &["json_graph"]
    }

    async fn invoke(&self, args: Arguments) -> Result<Value, ToolError> {
        let args: RenderArgs = decode_arguments(args)?;
        self.sink.accept(args.json_graph);
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChartQueue;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn render_passes_graph_through() {
        let queue = Arc::new(ChartQueue::new());
        let render = RenderAltair::new(queue.clone());

        let data = render
            .invoke(args(json!({"json_graph": "{\"mark\": \"point\"}"})))
            .await
            .unwrap();

        assert_eq!(data, json!({}));
        assert_eq!(queue.drain(), vec!["{\"mark\": \"point\"}"]);
    }

    #[tokio::test]
    async fn unknown_shell_is_an_argument_error() {
        let tool = ExecuteShellCommand::new(Arc::new(CommandExecutor::default()));
        let err = tool
            .invoke(args(json!({"shell": "zsh", "command": "ls"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bad_operation_is_an_argument_error() {
        let executor = QueryExecutor::new(
            &crate::backend::DatabaseSettings::default(),
            policy::QueryPolicy::default(),
        );
        let tool = QueryDatabase::new(Arc::new(executor));
        let err = tool
            .invoke(args(json!({"query": "SELECT 1", "operation": "merge"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_output_shape() {
        let tool = ExecuteShellCommand::new(Arc::new(CommandExecutor::default()));
        let data = tool
            .invoke(args(json!({"shell": "cmd", "command": "echo hi"})))
            .await
            .unwrap();
        assert_eq!(
            data,
            json!({"success": true, "exit_code": 0, "output": "hi\n", "error": ""})
        );
    }
}
