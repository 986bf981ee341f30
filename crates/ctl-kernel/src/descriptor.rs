//! Declarative tree descriptors, as read from YAML or JSON tree files.

use std::path::Path;

use anyhow::{Context, Result};
use ctl_bt::ParallelPolicy;
use ctl_core::{Comparator, PvValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub root: NodeDescriptor,
}

impl TreeDescriptor {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse tree descriptor as YAML")
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse tree descriptor as JSON")
    }

    /// Load a tree file. `.json` files are read as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree from {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.with_context(|| format!("Invalid tree file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDescriptor {
    Condition(ConditionItem),
    Acknowledge(AcknowledgeItem),
    SetPv(SetPvItem),
    IncrementPv(IncrementPvItem),
    Sequence(CompositeItem),
    Selector(CompositeItem),
    Parallel(ParallelItem),
    CheckAndDo(CheckAndDoItem),
}

impl NodeDescriptor {
    pub fn name(&self) -> &str {
        match self {
            NodeDescriptor::Condition(item) => &item.name,
            NodeDescriptor::Acknowledge(item) => &item.name,
            NodeDescriptor::SetPv(item) => &item.name,
            NodeDescriptor::IncrementPv(item) => &item.name,
            NodeDescriptor::Sequence(item) | NodeDescriptor::Selector(item) => &item.name,
            NodeDescriptor::Parallel(item) => &item.name,
            NodeDescriptor::CheckAndDo(item) => &item.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeDescriptor::Condition(_) => "condition",
            NodeDescriptor::Acknowledge(_) => "acknowledge",
            NodeDescriptor::SetPv(_) => "set_pv",
            NodeDescriptor::IncrementPv(_) => "increment_pv",
            NodeDescriptor::Sequence(_) => "sequence",
            NodeDescriptor::Selector(_) => "selector",
            NodeDescriptor::Parallel(_) => "parallel",
            NodeDescriptor::CheckAndDo(_) => "check_and_do",
        }
    }
}

/// Compares a process variable against a fixed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pv: String,
    pub operator: Comparator,
    pub value: PvValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgeItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub permitted: Vec<String>,
}

/// Writes `value` every step until the termination check (default `pv == value`) holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPvItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pv: String,
    pub value: PvValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_period_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_check: Option<ConditionItem>,
}

/// Adds `increment` to the variable every step. Without a termination check the cycle can
/// only end by timing out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementPvItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pv: String,
    pub increment: PvValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_period_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_check: Option<ConditionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Resume from the last running child instead of restarting every tick
    #[serde(default)]
    pub memory: bool,
    pub children: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy: ParallelPolicy,
    #[serde(default)]
    pub synchronise: bool,
    pub children: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckAndDoItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub check: ConditionItem,
    #[serde(rename = "do")]
    pub action: ActionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDescriptor {
    SetPv(SetPvItem),
    IncrementPv(IncrementPvItem),
}

impl ActionDescriptor {
    pub fn name(&self) -> &str {
        match self {
            ActionDescriptor::SetPv(item) => &item.name,
            ActionDescriptor::IncrementPv(item) => &item.name,
        }
    }
}
