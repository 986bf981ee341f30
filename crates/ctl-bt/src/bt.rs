use std::fmt;

use ctl_core::{Status, WorkerError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nodes::AckCondition;

#[derive(Debug, Error)]
pub enum BtError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("no node named '{0}' in tree")]
    NodeNotFound(String),

    #[error("node '{0}' does not accept acknowledgements")]
    NotAcknowledgeable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NodeKind {
    Condition,
    Acknowledge,
    Action,
    Sequence,
    Selector,
    Parallel,
    CheckAndDo,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Condition => "condition",
            NodeKind::Acknowledge => "acknowledge",
            NodeKind::Action => "action",
            NodeKind::Sequence => "sequence",
            NodeKind::Selector => "selector",
            NodeKind::Parallel => "parallel",
            NodeKind::CheckAndDo => "check_and_do",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping every node carries: identity, last status and a feedback message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    pub name: String,
    pub description: String,
    pub status: Status,
    pub message: String,
}

impl NodeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub name: String,
    pub status: Status,
}

/// Per-tick scratch state. Records every node visited, in completion order.
#[derive(Debug, Default)]
pub struct TickContext {
    pub tick: u64,
    visited: Vec<Visit>,
}

impl TickContext {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            visited: Vec::new(),
        }
    }

    pub fn record(&mut self, name: &str, status: Status) {
        self.visited.push(Visit {
            name: name.to_string(),
            status,
        });
    }

    pub fn visited(&self) -> &[Visit] {
        &self.visited
    }

    pub fn was_visited(&self, name: &str) -> bool {
        self.visited.iter().any(|v| v.name == name)
    }

    pub fn into_visited(self) -> Vec<Visit> {
        self.visited
    }
}

/// A node in a control tree.
///
/// Implementors provide `update`; the provided `tick` wraps it in the standard lifecycle:
/// `initialise` when entering from a non-running status, `update`, then `terminate` once the
/// result is no longer `Running`.
pub trait BtNode: Send + 'static {
    fn state(&self) -> &NodeState;

    fn state_mut(&mut self) -> &mut NodeState;

    fn kind(&self) -> NodeKind;

    fn update(&mut self, ctx: &mut TickContext) -> Status;

    /// One-time preparation before the first tick (e.g. starting workers). Recurses by default.
    fn setup(&mut self) -> Result<(), BtError> {
        for child in self.children_mut() {
            child.setup()?;
        }
        Ok(())
    }

    fn initialise(&mut self) {}

    fn terminate(&mut self, _new_status: Status) {}

    /// Permanent teardown (tree unload). Recurses by default.
    fn shutdown(&mut self) {
        for child in self.children_mut() {
            child.shutdown();
        }
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &[]
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut []
    }

    fn as_acknowledge_mut(&mut self) -> Option<&mut AckCondition> {
        None
    }

    fn name(&self) -> &str {
        &self.state().name
    }

    fn status(&self) -> Status {
        self.state().status
    }

    fn tick(&mut self, ctx: &mut TickContext) -> Status {
        if self.status() != Status::Running {
            self.initialise();
        }
        let status = self.update(ctx);
        if status != Status::Running {
            self.terminate(status);
        }
        self.state_mut().status = status;
        ctx.record(self.name(), status);
        status
    }

    /// Abandon this subtree: running nodes see `terminate(Invalid)`, everything ends `Invalid`.
    fn halt(&mut self) {
        if self.status() == Status::Running {
            self.terminate(Status::Invalid);
        }
        for child in self.children_mut() {
            child.halt();
        }
        self.state_mut().status = Status::Invalid;
    }
}
