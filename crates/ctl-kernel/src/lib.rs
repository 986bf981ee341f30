//! Tree kernel - loads control trees from descriptors and drives them.
//!
//! This crate turns declarative tree descriptors into runnable `ctl-bt` trees, owns their tick
//! threads, and exposes the operations a command layer needs: load, start, pause, step,
//! acknowledge, report, unload.

pub mod build;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod observability;

pub use build::{build_tree, validate, BuildContext, WorkerDefaults};
pub use config::{KernelConfig, TickConfig, TickMode, WorkerConfig};
pub use descriptor::{
    AcknowledgeItem, ActionDescriptor, CheckAndDoItem, CompositeItem, ConditionItem,
    IncrementPvItem, NodeDescriptor, ParallelItem, SetPvItem, TreeDescriptor,
};
pub use error::{BuildError, KernelError};
pub use manager::{TreeId, TreeManager, TreeSummary};
pub use observability::{EventEmitter, KernelEvent, TracingSink};
