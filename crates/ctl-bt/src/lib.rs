//! Behavior Tree runtime for hardware control built on `ctl-core`.
//!
//! A single tick thread walks the tree through [`TreeTicker`]. Action leaves hand their work to
//! a persistent worker thread and only ever read its status cell, so a tick never blocks on
//! hardware.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod action;
pub mod bt;
pub mod idiom;
pub mod nodes;
pub mod report;
pub mod ticker;

pub use action::{ActionNode, ActionWork};
pub use bt::{BtError, BtNode, NodeKind, NodeState, TickContext, Visit};
pub use ctl_core::Status;
pub use idiom::CheckAndDo;
// Defaults: reactive control flow nodes (re-check earlier children every tick).
//
// Memory variants are available as `MemSelector` / `MemSequence` for cases where you
// explicitly want "resume the running child without re-checking earlier ones".
pub use nodes::{
    AckCondition, Condition, Parallel, ParallelPolicy, ReactiveSelector, ReactiveSequence,
    Selector as MemSelector, Sequence as MemSequence,
};
pub use nodes::{ReactiveSelector as Selector, ReactiveSequence as Sequence};
pub use report::{find_node, find_node_mut, NodeReport};
pub use ticker::{TickCommand, TickDriver, TickPolicy, TickSnapshot, TreeTicker};
