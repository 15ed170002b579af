use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use channel::LineChannel;
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use cli::http::{self, AppState};
use cli::{Config, Error, Result, logging};
use runtime::{
    ChartDirectory, ChartQueue, CommandExecutor, Dispatcher, QueryExecutor, Registry, RenderSink,
};
use storage::{Event, EventKind, EventStore};
use tracing::info;

const CONFIG_FILE: &str = "switchboard.toml";
const DEFAULT_SCHEMA: &str = "public";

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Dispatches agent function calls to database, shell, and chart backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ./switchboard.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve function calls over stdin/stdout
    Serve,
    /// Serve the query and execute endpoints over HTTP
    Http {
        #[arg(short, long, default_value = "127.0.0.1:3001")]
        bind: SocketAddr,
    },
    /// Print the function declarations sent to the agent session
    Tools,
    /// List tables in a schema
    Tables {
        #[arg(short, long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },
    /// Show the columns of a table
    Describe {
        table: String,
        #[arg(short, long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },
    /// Show recently executed shell commands
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List serving sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show journal events for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (tool_call, tool_result, session_start, session_end)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(&config.logging.level, cli.verbose)?;

    match cli.command {
        Some(Commands::Serve) | None => cmd_serve(config).await,
        Some(Commands::Http { bind }) => cmd_http(config, bind).await,
        Some(Commands::Tools) => cmd_tools(config),
        Some(Commands::Tables { schema }) => cmd_tables(config, &schema).await,
        Some(Commands::Describe { table, schema }) => cmd_describe(config, &schema, &table).await,
        Some(Commands::History { limit }) => cmd_history(&config, limit),
        Some(Commands::Sessions { limit }) => cmd_sessions(&config, limit),
        Some(Commands::Logs { session, kind }) => cmd_logs(&config, &session, kind.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None if Path::new(CONFIG_FILE).exists() => Config::load(CONFIG_FILE)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn build_registry(
    config: &Config,
    queries: Arc<QueryExecutor>,
    charts: Arc<dyn RenderSink>,
) -> Registry {
    let commands = Arc::new(CommandExecutor::new(config.commands.clone()));
    Registry::standard(queries, commands, charts)
}

fn query_executor(config: &Config) -> Arc<QueryExecutor> {
    Arc::new(QueryExecutor::new(&config.database, config.policy.clone()))
}

async fn cmd_serve(config: Config) -> Result<()> {
    config.credential()?;

    let queries = query_executor(&config);
    let charts = Arc::new(ChartDirectory::new(config.charts_dir(&data_dir()))?);
    let registry = build_registry(&config, Arc::clone(&queries), charts);

    let mut dispatcher = Dispatcher::new(registry);
    if config.journal.enabled {
        let path = config.journal_path(&data_dir());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        dispatcher = dispatcher.with_journal(Arc::new(EventStore::open(&path)?));
        info!(journal = %path.display(), "journal enabled");
    }
    if let Some(session) = dispatcher.session_id() {
        info!(%session, "session started");
    }

    let mut channel = LineChannel::stdio();
    let served = dispatcher.serve(&mut channel).await;
    queries.close().await;

    let summary = served?;
    info!(
        batches = summary.batches,
        calls = summary.calls,
        "serve finished"
    );
    Ok(())
}

async fn cmd_http(config: Config, bind: SocketAddr) -> Result<()> {
    let state = AppState {
        queries: query_executor(&config),
        commands: Arc::new(CommandExecutor::new(config.commands.clone())),
    };
    let queries = Arc::clone(&state.queries);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    http::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    queries.close().await;
    Ok(())
}

fn cmd_tools(config: Config) -> Result<()> {
    println!("{}", tool_declarations(&config)?);
    Ok(())
}

/// Declarations only; no chart directory is created.
fn tool_declarations(config: &Config) -> Result<String> {
    let registry = build_registry(config, query_executor(config), Arc::new(ChartQueue::new()));
    Ok(serde_json::to_string_pretty(&registry.specs())?)
}

async fn cmd_tables(config: Config, schema: &str) -> Result<()> {
    let queries = query_executor(&config);
    let tables = queries.list_tables(schema).await;
    queries.close().await;

    let tables = tables?;
    if tables.is_empty() {
        println!("No tables in schema '{schema}'.");
    }
    for table in tables {
        println!("{table}");
    }
    Ok(())
}

async fn cmd_describe(config: Config, schema: &str, table: &str) -> Result<()> {
    let queries = query_executor(&config);
    let columns = queries.describe_table(schema, table).await;
    queries.close().await;

    let columns = columns?;
    if columns.is_empty() {
        println!("Table '{schema}.{table}' not found.");
        return Ok(());
    }

    println!("{:<32}  {:<28}  {:<8}  DEFAULT", "COLUMN", "TYPE", "NULL");
    println!("{}", "-".repeat(80));
    for column in columns {
        println!(
            "{:<32}  {:<28}  {:<8}  {}",
            column.column_name,
            column.data_type,
            if column.is_nullable { "yes" } else { "no" },
            column.column_default.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_history(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let records = store.recent_commands(limit)?;

    if records.is_empty() {
        println!("No commands recorded.");
        return Ok(());
    }

    for record in records {
        let time = Local
            .from_utc_datetime(&record.timestamp.naive_utc())
            .format("%Y-%m-%d %H:%M:%S");
        println!("[{time}] {}", record.command_label);
        if let Some(output) = record.output.as_deref().map(str::trim_end) {
            if !output.is_empty() {
                println!("{}", truncate(output, 400));
            }
        }
    }
    Ok(())
}

fn cmd_sessions(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<8}  STATUS",
        "SESSION ID", "STARTED", "CALLS"
    );
    println!("{}", "-".repeat(80));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = if summary.ended_at.is_some() {
            "ended"
        } else {
            "active"
        };
        println!(
            "{:<36}  {:<20}  {:<8}  {status}",
            summary.id, started, summary.call_count
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config, session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    let sessions = store.list_sessions()?;
    let matching: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(session_prefix))
        .collect();

    let session_id = match matching.as_slice() {
        [] => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        [only] => only.id,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_events(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::SessionStart => {
            println!("[{time}] === Session started ===");
        }
        EventKind::SessionEnd => {
            println!("[{time}] === Session ended ===");
        }
        EventKind::ToolCall {
            call_id,
            name,
            input,
        } => {
            println!("[{time}] CALL {call_id}: {name} {}", truncate(&input.to_string(), 200));
        }
        EventKind::ToolResult {
            call_id,
            name,
            output,
        } => {
            println!("[{time}] RESULT {call_id}: {name} {}", truncate(&output.to_string(), 200));
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn open_store(config: &Config) -> Result<EventStore> {
    let path = config.journal_path(&data_dir());

    if !path.exists() {
        return Err(Error::JournalNotFound { path });
    }

    Ok(EventStore::open(&path)?)
}

fn data_dir() -> PathBuf {
    dirs_data_dir().unwrap_or_else(|| ".switchboard".into())
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/switchboard"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("switchboard"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("switchboard"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
