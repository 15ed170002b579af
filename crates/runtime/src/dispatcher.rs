//! Batch dispatch.
//!
//! Each call in a batch runs on its own task. Whatever happens inside a
//! handler (error, panic) becomes a `Failure` outcome for that call alone,
//! and every call gets exactly one response carrying its original id.

use std::collections::HashMap;
use std::sync::Arc;

use channel::{Batch, Call, Channel, Outcome, Response};
use futures::future::join_all;
use serde_json::Value;
use storage::{CommandRecord, Event, EventKind, EventStore, SessionId};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::tools::builtin::EXECUTE_SHELL_COMMAND;
use crate::tools::{Registry, ToolError};

/// Counters for one serving session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub batches: usize,
    pub calls: usize,
}

struct Journal {
    store: Arc<EventStore>,
    session: SessionId,
}

/// One pending journal write.
enum Entry {
    Event(Event),
    Command(CommandRecord),
}

/// Routes calls to capabilities and correlates their outcomes.
pub struct Dispatcher {
    registry: Arc<Registry>,
    journal: Option<Journal>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            journal: None,
        }
    }

    /// Record calls, results, and command history in `store`.
    pub fn with_journal(mut self, store: Arc<EventStore>) -> Self {
        self.journal = Some(Journal {
            store,
            session: SessionId::new(),
        });
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Journal session id, when journaling is enabled.
    pub fn session_id(&self) -> Option<SessionId> {
        self.journal.as_ref().map(|j| j.session)
    }

    /// Execute every call in `batch` and return one response per call.
    ///
    /// Responses come back in call order; callers should still match them
    /// by id.
    pub async fn process(&self, batch: Batch) -> Vec<Response> {
        info!(calls = batch.len(), "dispatching batch");

        let tasks: Vec<_> = batch
            .calls
            .into_iter()
            .map(|call| {
                let registry = Arc::clone(&self.registry);
                let id = call.id.clone();
                let name = call.name.clone();
                let handle = tokio::spawn(async move { execute_call(&registry, call).await });
                (id, name, handle)
            })
            .collect();

        join_all(tasks.into_iter().map(|(id, name, handle)| async move {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(call_id = %id, capability = %name, error = %e, "call handler aborted");
                    Outcome::failure(format!("{name} handler aborted: {e}"))
                }
            };
            Response::new(id, name, outcome)
        }))
        .await
    }

    /// Serve batches from `channel` until it closes.
    ///
    /// Responses for a batch are sent in a single `send`.
    pub async fn serve<C: Channel>(&self, channel: &mut C) -> Result<ServeSummary> {
        let mut summary = ServeSummary::default();
        self.journal_event(EventKind::SessionStart).await;

        let result = loop {
            let batch = match channel.receive().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            let calls = self.journal.as_ref().map(|_| batch.calls.clone());
            if let Some(calls) = &calls {
                self.write_journal(self.call_entries(calls)).await;
            }

            let responses = self.process(batch).await;

            if let Some(calls) = &calls {
                self.write_journal(self.response_entries(calls, &responses)).await;
            }

            summary.batches += 1;
            summary.calls += responses.len();

            if let Err(e) = channel.send(responses).await {
                break Err(e);
            }
        };

        self.journal_event(EventKind::SessionEnd).await;
        info!(
            batches = summary.batches,
            calls = summary.calls,
            "session closed"
        );
        result?;
        Ok(summary)
    }

    async fn journal_event(&self, kind: EventKind) {
        let entries = self.event_entry(kind).into_iter().collect();
        self.write_journal(entries).await;
    }

    fn event_entry(&self, kind: EventKind) -> Option<Entry> {
        let journal = self.journal.as_ref()?;
        Some(Entry::Event(Event::new(journal.session, kind)))
    }

    fn call_entries(&self, calls: &[Call]) -> Vec<Entry> {
        calls
            .iter()
            .filter_map(|call| {
                self.event_entry(EventKind::ToolCall {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                })
            })
            .collect()
    }

    fn response_entries(&self, calls: &[Call], responses: &[Response]) -> Vec<Entry> {
        let by_id: HashMap<&str, &Call> = calls.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut entries = Vec::new();

        for response in responses {
            let output = serde_json::to_value(&response.outcome).unwrap_or(Value::Null);
            entries.extend(self.event_entry(EventKind::ToolResult {
                call_id: response.id.clone(),
                name: response.name.clone(),
                output,
            }));

            if response.name != EXECUTE_SHELL_COMMAND {
                continue;
            }
            if let Some(call) = by_id.get(response.id.as_str()) {
                entries.push(Entry::Command(command_record(call, &response.outcome)));
            }
        }
        entries
    }

    /// Write entries on the blocking pool, in order.
    async fn write_journal(&self, entries: Vec<Entry>) {
        let Some(journal) = &self.journal else {
            return;
        };
        if entries.is_empty() {
            return;
        }

        let store = Arc::clone(&journal.store);
        let written = tokio::task::spawn_blocking(move || {
            for entry in entries {
                let result = match &entry {
                    Entry::Event(event) => store.append(event),
                    Entry::Command(record) => store.record_command(record),
                };
                if let Err(e) = result {
                    warn!(error = %e, "failed to write journal entry");
                }
            }
        })
        .await;

        if let Err(e) = written {
            warn!(error = %e, "journal writer aborted");
        }
    }
}

/// Resolve, check, and invoke a single call.
pub async fn execute_call(registry: &Registry, call: Call) -> Outcome {
    let Call { id, name, args } = call;

    let result = match registry.resolve(&name) {
        None => Err(ToolError::NotFound(name.clone())),
        Some(entry) => match entry.check_arguments(args) {
            Ok(args) => entry.invoke(args).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(data) => {
            debug!(call_id = %id, capability = %name, "call succeeded");
            Outcome::success(data)
        }
        Err(e) => {
            warn!(call_id = %id, capability = %name, kind = ?e.kind(), error = %e, "call failed");
            Outcome::failure(e.to_string())
        }
    }
}

fn command_record(call: &Call, outcome: &Outcome) -> CommandRecord {
    let shell = call.args.get("shell").and_then(Value::as_str).unwrap_or("?");
    let command = call.args.get("command").and_then(Value::as_str).unwrap_or("");
    let label = format!("{shell}: {command}");

    let output = match outcome {
        Outcome::Success { data } => ["output", "error"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_str))
            .find(|text| !text.is_empty())
            .map(str::to_string),
        Outcome::Failure { message } => Some(message.clone()),
    };

    CommandRecord::new(label, output)
}
