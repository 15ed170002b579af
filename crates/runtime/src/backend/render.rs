//! Visualization hand-off.
//!
//! Graph specifications are passed through untouched. Parsing and drawing
//! belong to whoever drains the sink.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

/// Destination for serialized graph specifications.
pub trait RenderSink: Send + Sync {
    /// Store a graph for the downstream renderer. Never fails the call.
    fn accept(&self, graph: String);
}

/// In-memory sink; the renderer drains it.
#[derive(Debug, Default)]
pub struct ChartQueue {
    pending: Mutex<VecDeque<String>>,
}

impl ChartQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every pending graph, oldest first.
    pub fn drain(&self) -> Vec<String> {
        match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RenderSink for ChartQueue {
    fn accept(&self, graph: String) {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.push_back(graph);
        debug!(pending = pending.len(), "chart queued");
    }
}

/// Writes each graph to `<dir>/<uuid>.json` for an external renderer.
#[derive(Debug, Clone)]
pub struct ChartDirectory {
    dir: PathBuf,
}

impl ChartDirectory {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RenderSink for ChartDirectory {
    fn accept(&self, graph: String) {
        let path = self.dir.join(format!("{}.json", Uuid::new_v4()));
        match std::fs::write(&path, graph) {
            Ok(()) => debug!(path = %path.display(), "chart written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write chart"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drains_in_order() {
        let queue = ChartQueue::new();
        queue.accept("{\"mark\":\"bar\"}".to_string());
        queue.accept("not even json".to_string());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec!["{\"mark\":\"bar\"}", "not even json"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn directory_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ChartDirectory::new(dir.path().join("charts")).unwrap();
        sink.accept("{}".to_string());

        let files: Vec<_> = std::fs::read_dir(sink.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
