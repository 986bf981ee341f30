//! Kernel configuration loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ctl_bt::TickPolicy;
use ctl_core::PvValue;
use serde::{Deserialize, Serialize};

use crate::build::WorkerDefaults;

/// Kernel configuration, loaded from `.ctltree/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub version: Option<String>,

    pub tick: TickConfig,

    pub worker: WorkerConfig,

    /// JSON-lines event log (relative to the project root until resolved)
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,

    /// Initial process-variable values for the in-memory store
    pub process_variables: BTreeMap<String, PvValue>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            version: None,
            tick: TickConfig::default(),
            worker: WorkerConfig::default(),
            events_path: default_events_path(),
            process_variables: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    #[default]
    Continuous,
    Interactive,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default)]
    pub mode: TickMode,

    #[serde(default = "default_tick_period_ms")]
    pub period_ms: u64,

    /// Number of ticks in `count` mode
    #[serde(default = "default_tick_count")]
    pub count: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            mode: TickMode::default(),
            period_ms: default_tick_period_ms(),
            count: default_tick_count(),
        }
    }
}

impl TickConfig {
    pub fn policy(&self) -> TickPolicy {
        let period = Duration::from_millis(self.period_ms);
        match self.mode {
            TickMode::Continuous => TickPolicy::Continuous { period },
            TickMode::Interactive => TickPolicy::Interactive,
            TickMode::Count => TickPolicy::Count {
                ticks: self.count,
                period,
            },
        }
    }
}

/// Defaults applied to action nodes that do not set their own timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_loop_period_ms")]
    pub loop_period_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    #[serde(default = "default_gate_poll_ms")]
    pub gate_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: default_loop_period_ms(),
            timeout_ms: default_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            gate_poll_ms: default_gate_poll_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn defaults(&self) -> WorkerDefaults {
        WorkerDefaults {
            loop_period: Duration::from_millis(self.loop_period_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            gate_poll: Duration::from_millis(self.gate_poll_ms),
        }
    }
}

fn default_events_path() -> PathBuf {
    PathBuf::from(".ctltree/events.jsonl")
}
fn default_tick_period_ms() -> u64 {
    500
}
fn default_tick_count() -> u64 {
    1
}
fn default_loop_period_ms() -> u64 {
    100
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_stop_grace_ms() -> u64 {
    200
}
fn default_gate_poll_ms() -> u64 {
    50
}

impl KernelConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .ctltree/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".ctltree/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject zero periods and timeouts. A zero gate poll would spin every idle worker.
    pub fn validate(&self) -> Result<()> {
        if self.tick.mode != TickMode::Interactive {
            ensure!(self.tick.period_ms > 0, "tick.period_ms must be positive");
        }
        ensure!(self.worker.loop_period_ms > 0, "worker.loop_period_ms must be positive");
        ensure!(self.worker.timeout_ms > 0, "worker.timeout_ms must be positive");
        ensure!(self.worker.gate_poll_ms > 0, "worker.gate_poll_ms must be positive");
        Ok(())
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.events_path = project_root.join(&self.events_path);
    }
}
