//! Observability - kernel events and trace forwarding.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use ctl_tools::{TraceEvent, TraceSink};
use serde::{Deserialize, Serialize};

/// A kernel event, one JSON line in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub tree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl KernelEvent {
    pub fn new(event_type: &str, tree: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            tree: tree.to_string(),
            node: None,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Appends kernel events to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    events_path: PathBuf,
}

impl EventEmitter {
    pub fn new(events_path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
        }
    }

    /// Emitter writing to `.ctltree/events.jsonl` under the project root.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".ctltree/events.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.events_path
    }

    pub fn emit(&self, event: &KernelEvent) -> Result<()> {
        if let Some(parent) = self.events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;

        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }

    /// Emit, logging instead of failing. Event logging never stops a tree.
    pub fn emit_or_warn(&self, event: &KernelEvent) {
        if let Err(e) = self.emit(event) {
            tracing::warn!(
                path = %self.events_path.display(),
                event_type = %event.event_type,
                error = %e,
                "Failed to write kernel event"
            );
        }
    }

    /// Read the last `limit` events. Unreadable lines are skipped.
    pub fn read_recent(&self, limit: usize) -> Vec<KernelEvent> {
        let file = match std::fs::File::open(&self.events_path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let reader = BufReader::new(file);
        let mut events: Vec<KernelEvent> = reader
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        if events.len() > limit {
            events.drain(0..events.len() - limit);
        }

        events
    }
}

/// Forwards worker trace events into `tracing` at debug level.
#[derive(Debug, Clone)]
pub struct TracingSink {
    tree: String,
}

impl TracingSink {
    pub fn new(tree: impl Into<String>) -> Self {
        Self { tree: tree.into() }
    }
}

impl TraceSink for TracingSink {
    fn emit(&mut self, event: TraceEvent) {
        tracing::debug!(
            tree = %self.tree,
            node = %event.node,
            tag = %event.tag,
            status = ?event.status,
            detail = event.detail.as_deref().unwrap_or(""),
            "Trace"
        );
    }
}
