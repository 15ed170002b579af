//! Backends behind the capabilities.

mod command;
mod query;
mod render;

pub use command::{
    CommandError, CommandExecutor, CommandOutput, CommandRequest, CommandSettings,
    DEFAULT_TIMEOUT_MS, MAX_OUTPUT_SIZE, ShellKind, ShellTable,
};
pub use query::{ColumnInfo, DatabaseSettings, QueryError, QueryExecutor, QueryResult};
pub use render::{ChartDirectory, ChartQueue, RenderSink};
