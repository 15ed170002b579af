//! SQLite event store implementation.

use crate::{CommandRecord, Error, Event, Result, SessionId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed event store.
///
/// The connection is guarded by a mutex so one store can be shared by the
/// serving loop and whoever reads history.
pub struct EventStore {
    conn: Mutex<Connection>,
}

/// Summary of one serving session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub call_count: u64,
}

#[derive(Deserialize)]
struct SessionRow {
    session_id: String,
    started_at: String,
    ended_at: Option<String>,
    call_count: i64,
}

#[derive(Deserialize)]
struct CommandRow {
    command_label: String,
    output: Option<String>,
    timestamp: String,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events(session_id, timestamp);
            CREATE TABLE IF NOT EXISTS command_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command_label TEXT NOT NULL,
                output TEXT,
                timestamp TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                format_timestamp(&event.timestamp),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load all events for a session, ordered by timestamp.
    pub fn load_session(&self, session_id: SessionId) -> Result<Vec<Event>> {
        self.load_events(session_id, None)
    }

    /// Load events for a session, optionally restricted to one kind
    /// (`tool_call`, `tool_result`, `session_start`, `session_end`).
    pub fn load_events(&self, session_id: SessionId, kind: Option<&str>) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, timestamp, data FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY timestamp, rowid",
        )?;

        let rows = stmt
            .query_map(params![session_id.to_string(), kind], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, session_id, timestamp, data)| {
                Ok(Event {
                    id: id
                        .parse()
                        .map_err(|_| Error::Corrupt(format!("event id {id}")))?,
                    session_id: session_id
                        .parse()
                        .map_err(|_| Error::Corrupt(format!("session id {session_id}")))?,
                    timestamp: parse_timestamp(&timestamp)?,
                    kind: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    /// List sessions, most recent first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id,
                    COALESCE(MIN(CASE WHEN kind = 'session_start' THEN timestamp END),
                             MIN(timestamp)) AS started_at,
                    MAX(CASE WHEN kind = 'session_end' THEN timestamp END) AS ended_at,
                    SUM(CASE WHEN kind = 'tool_call' THEN 1 ELSE 0 END) AS call_count
             FROM events
             GROUP BY session_id
             ORDER BY started_at DESC, MAX(rowid) DESC",
        )?;

        let sessions = serde_rusqlite::from_rows::<SessionRow>(stmt.query([])?)
            .map(|row| {
                let row = row?;
                Ok(SessionSummary {
                    id: row
                        .session_id
                        .parse()
                        .map_err(|_| Error::Corrupt(format!("session id {}", row.session_id)))?,
                    started_at: parse_timestamp(&row.started_at)?,
                    ended_at: row.ended_at.as_deref().map(parse_timestamp).transpose()?,
                    call_count: u64::try_from(row.call_count).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Append one entry to the command execution log.
    pub fn record_command(&self, record: &CommandRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO command_history (command_label, output, timestamp) VALUES (?1, ?2, ?3)",
            params![
                record.command_label,
                record.output,
                format_timestamp(&record.timestamp),
            ],
        )?;
        Ok(())
    }

    /// The most recent `limit` commands, newest first.
    pub fn recent_commands(&self, limit: usize) -> Result<Vec<CommandRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT command_label, output, timestamp FROM command_history
             ORDER BY id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let records = serde_rusqlite::from_rows::<CommandRow>(stmt.query([limit])?)
            .map(|row| {
                let row = row?;
                Ok(CommandRecord {
                    command_label: row.command_label,
                    output: row.output,
                    timestamp: parse_timestamp(&row.timestamp)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| Error::Corrupt(format!("timestamp {raw}")))
}
