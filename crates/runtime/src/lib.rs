//! Switchboard runtime: capability dispatch for agent function calls.
//!
//! This crate receives batches of named function calls from an agent
//! session, routes each to a backend, and answers every call with exactly
//! one correlated outcome.
//!
//! # Overview
//!
//! - **Registry**: the fixed set of capabilities (`query_database`,
//!   `execute_shell_command`, `render_altair`), built once at startup.
//! - **Dispatcher**: runs each call of a batch on its own task, turning any
//!   fault into a `Failure` outcome for that call only.
//! - **Backends**: [`QueryExecutor`] (pooled Postgres behind the query
//!   policy), [`CommandExecutor`] (one child process per call, bounded by a
//!   timeout), and [`RenderSink`] (chart hand-off).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use channel::LineChannel;
//! use policy::QueryPolicy;
//! use runtime::{
//!     ChartQueue, CommandExecutor, CommandSettings, DatabaseSettings, Dispatcher, QueryExecutor,
//!     Registry,
//! };
//!
//! # async fn example() -> runtime::Result<()> {
//! let settings = DatabaseSettings::default();
//! let queries = Arc::new(QueryExecutor::new(&settings, QueryPolicy::default()));
//! let commands = Arc::new(CommandExecutor::new(CommandSettings::default()));
//! let charts = Arc::new(ChartQueue::new());
//!
//! let dispatcher = Dispatcher::new(Registry::standard(queries, commands, charts));
//! let mut channel = LineChannel::stdio();
//! dispatcher.serve(&mut channel).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod dispatcher;
mod error;
pub mod tools;

// Backends
pub use backend::{
    ChartDirectory, ChartQueue, ColumnInfo, CommandError, CommandExecutor, CommandOutput,
    CommandRequest, CommandSettings, DatabaseSettings, QueryError, QueryExecutor, QueryResult,
    RenderSink, ShellKind, ShellTable,
};

// Dispatch
pub use dispatcher::{Dispatcher, ServeSummary, execute_call};

// Error types
pub use error::{Error, Result};

// Capabilities
pub use tools::{
    Arguments, Capability, CapabilityEntry, ErrorKind, Registry, ToolError, ToolSpec,
};
