//! SQLite-backed journal for switchboard.
//!
//! Two append-only logs live in one database:
//!
//! 1. **Dispatch events**: every call received and every response sent,
//!    grouped by serving session. Answers "what did the agent ask for and
//!    what did it get back?".
//!
//! 2. **Command history**: one [`CommandRecord`] per shell command run,
//!    the execution log shown to users.
//!
//! # Example
//!
//! ```no_run
//! use storage::{CommandRecord, Event, EventKind, EventStore, SessionId};
//!
//! let store = EventStore::open("journal.db")?;
//!
//! let session_id = SessionId::new();
//! store.append(&Event::new(session_id, EventKind::SessionStart))?;
//! store.append(&Event::tool_call(
//!     session_id,
//!     "call-1",
//!     "execute_shell_command",
//!     serde_json::json!({"shell": "cmd", "command": "echo hi"}),
//! ))?;
//! store.record_command(&CommandRecord::new("cmd: echo hi", Some("hi\n".into())))?;
//!
//! for record in store.recent_commands(10)? {
//!     println!("{} {}", record.timestamp, record.command_label);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{CommandRecord, Event, EventKind, SessionId};
pub use store::{EventStore, SessionSummary};
