use std::fmt::Write as _;

use ctl_core::Status;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bt::{BtNode, NodeKind};

/// Tree-shaped status snapshot for reporting layers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeReport {
    pub name: String,
    pub kind: NodeKind,
    pub status: Status,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "String::is_empty"))]
    pub message: String,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub children: Vec<NodeReport>,
}

impl NodeReport {
    pub fn of(node: &dyn BtNode) -> Self {
        Self {
            name: node.name().to_string(),
            kind: node.kind(),
            status: node.status(),
            message: node.state().message.clone(),
            children: node.children().iter().map(|c| Self::of(c.as_ref())).collect(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&NodeReport> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Indented one-line-per-node rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = write!(
            out,
            "{:indent$}[{}] {} ({})",
            "",
            self.status,
            self.name,
            self.kind,
            indent = depth * 2
        );
        if !self.message.is_empty() {
            let _ = write!(out, " - {}", self.message);
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

pub fn find_node<'a>(node: &'a dyn BtNode, name: &str) -> Option<&'a dyn BtNode> {
    if node.name() == name {
        return Some(node);
    }
    node.children()
        .iter()
        .find_map(|child| find_node(child.as_ref(), name))
}

pub fn find_node_mut<'a>(node: &'a mut dyn BtNode, name: &str) -> Option<&'a mut dyn BtNode> {
    if node.name() == name {
        return Some(node);
    }
    for child in node.children_mut() {
        if let Some(found) = find_node_mut(child.as_mut(), name) {
            return Some(found);
        }
    }
    None
}
