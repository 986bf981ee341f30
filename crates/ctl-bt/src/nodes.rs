use std::collections::BTreeSet;

use ctl_core::Status;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bt::{BtNode, NodeKind, NodeState, TickContext};

/// Halt every child after `index` that is still running (lower priority than the one that
/// decided this tick).
fn halt_running_after(children: &mut [Box<dyn BtNode>], index: usize) {
    for child in children.iter_mut().skip(index + 1) {
        if child.status() == Status::Running {
            child.halt();
        }
    }
}

fn halt_running(children: &mut [Box<dyn BtNode>]) {
    for child in children.iter_mut() {
        if child.status() == Status::Running {
            child.halt();
        }
    }
}

/// Fallback that restarts from the first child every tick.
///
/// Earlier children are always re-checked, so a condition that becomes true pre-empts a
/// running lower-priority child.
pub struct ReactiveSelector {
    state: NodeState,
    children: Vec<Box<dyn BtNode>>,
}

impl ReactiveSelector {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn BtNode>>) -> Self {
        Self {
            state: NodeState::new(name),
            children,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }
}

impl BtNode for ReactiveSelector {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Selector
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        for i in 0..self.children.len() {
            let status = self.children[i].tick(ctx);
            if status != Status::Failure {
                halt_running_after(&mut self.children, i);
                return status;
            }
        }
        Status::Failure
    }

    fn terminate(&mut self, _new_status: Status) {
        halt_running(&mut self.children);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut self.children
    }
}

/// Sequence that restarts from the first child every tick.
pub struct ReactiveSequence {
    state: NodeState,
    children: Vec<Box<dyn BtNode>>,
}

impl ReactiveSequence {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn BtNode>>) -> Self {
        Self {
            state: NodeState::new(name),
            children,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }
}

impl BtNode for ReactiveSequence {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sequence
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        for i in 0..self.children.len() {
            let status = self.children[i].tick(ctx);
            if status != Status::Success {
                halt_running_after(&mut self.children, i);
                return status;
            }
        }
        Status::Success
    }

    fn terminate(&mut self, _new_status: Status) {
        halt_running(&mut self.children);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut self.children
    }
}

/// Sequence with memory: resumes from the child that was last not `Success`.
///
/// Already-succeeded children are not re-ticked within a cycle, so a running action is never
/// re-initialised by its own parent.
pub struct Sequence {
    state: NodeState,
    children: Vec<Box<dyn BtNode>>,
    index: usize,
}

impl Sequence {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn BtNode>>) -> Self {
        Self {
            state: NodeState::new(name),
            children,
            index: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }
}

impl BtNode for Sequence {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Sequence
    }

    fn initialise(&mut self) {
        self.index = 0;
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        while self.index < self.children.len() {
            match self.children[self.index].tick(ctx) {
                Status::Success => self.index += 1,
                status => return status,
            }
        }
        Status::Success
    }

    fn terminate(&mut self, _new_status: Status) {
        self.index = 0;
        halt_running(&mut self.children);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut self.children
    }
}

/// Selector with memory: resumes from the child that was last not `Failure`.
pub struct Selector {
    state: NodeState,
    children: Vec<Box<dyn BtNode>>,
    index: usize,
}

impl Selector {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn BtNode>>) -> Self {
        Self {
            state: NodeState::new(name),
            children,
            index: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }
}

impl BtNode for Selector {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Selector
    }

    fn initialise(&mut self) {
        self.index = 0;
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        while self.index < self.children.len() {
            match self.children[self.index].tick(ctx) {
                Status::Failure => self.index += 1,
                status => return status,
            }
        }
        Status::Failure
    }

    fn terminate(&mut self, _new_status: Status) {
        self.index = 0;
        halt_running(&mut self.children);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut self.children
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ParallelPolicy {
    /// `Success` once every child has succeeded.
    #[default]
    SuccessOnAll,
    /// `Success` as soon as any child succeeds.
    SuccessOnOne,
}

/// Ticks every child every tick and combines the statuses through a [`ParallelPolicy`].
///
/// Any child failure fails the parallel. With `synchronise`, children that already succeeded in
/// the current cycle are not re-ticked.
pub struct Parallel {
    state: NodeState,
    children: Vec<Box<dyn BtNode>>,
    policy: ParallelPolicy,
    synchronise: bool,
    settled: Vec<bool>,
}

impl Parallel {
    pub fn new(
        name: impl Into<String>,
        policy: ParallelPolicy,
        children: Vec<Box<dyn BtNode>>,
    ) -> Self {
        let settled = vec![false; children.len()];
        Self {
            state: NodeState::new(name),
            children,
            policy,
            synchronise: false,
            settled,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }

    pub fn with_synchronise(mut self, synchronise: bool) -> Self {
        self.synchronise = synchronise;
        self
    }

    pub fn policy(&self) -> ParallelPolicy {
        self.policy
    }
}

impl BtNode for Parallel {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Parallel
    }

    fn initialise(&mut self) {
        self.settled.iter_mut().for_each(|s| *s = false);
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        let mut statuses = Vec::with_capacity(self.children.len());
        for (child, settled) in self.children.iter_mut().zip(self.settled.iter_mut()) {
            let status = if self.synchronise && *settled {
                Status::Success
            } else {
                child.tick(ctx)
            };
            *settled = status == Status::Success;
            statuses.push(status);
        }

        if statuses.contains(&Status::Failure) {
            return Status::Failure;
        }
        let succeeded = match self.policy {
            ParallelPolicy::SuccessOnAll => statuses.iter().all(|s| *s == Status::Success),
            ParallelPolicy::SuccessOnOne => statuses.contains(&Status::Success),
        };
        if succeeded {
            Status::Success
        } else {
            Status::Running
        }
    }

    fn terminate(&mut self, _new_status: Status) {
        halt_running(&mut self.children);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        &mut self.children
    }
}

/// Leaf evaluating a predicate synchronously on the tick thread: `true` is `Success`,
/// anything else `Failure`. Never `Running`.
pub struct Condition<F> {
    state: NodeState,
    cond: F,
}

impl<F> Condition<F>
where
    F: FnMut() -> bool + Send + 'static,
{
    pub fn new(name: impl Into<String>, cond: F) -> Self {
        Self {
            state: NodeState::new(name),
            cond,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }
}

impl<F> BtNode for Condition<F>
where
    F: FnMut() -> bool + Send + 'static,
{
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn update(&mut self, _ctx: &mut TickContext) -> Status {
        Status::from((self.cond)())
    }
}

/// Condition that succeeds once an authorized identity has acknowledged it.
///
/// The flag is never reset automatically.
#[derive(Debug)]
pub struct AckCondition {
    state: NodeState,
    permitted: BTreeSet<String>,
    acknowledged_by: Option<String>,
}

impl AckCondition {
    pub fn new<I, S>(name: impl Into<String>, permitted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: NodeState::new(name),
            permitted: permitted.into_iter().map(Into::into).collect(),
            acknowledged_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_by.is_some()
    }

    pub fn acknowledged_by(&self) -> Option<&str> {
        self.acknowledged_by.as_deref()
    }

    /// Unauthorized identities are logged and ignored; the caller is told nothing either way.
    pub fn acknowledge(&mut self, identity: &str) {
        if !self.permitted.contains(identity) {
            tracing::warn!(node = %self.state.name, identity = %identity, "Acknowledgement rejected");
            return;
        }
        tracing::info!(node = %self.state.name, identity = %identity, "Acknowledged");
        self.acknowledged_by = Some(identity.to_string());
        self.state.message = format!("Acknowledged by {identity}");
    }
}

impl BtNode for AckCondition {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Acknowledge
    }

    fn update(&mut self, _ctx: &mut TickContext) -> Status {
        Status::from(self.is_acknowledged())
    }

    fn as_acknowledge_mut(&mut self) -> Option<&mut AckCondition> {
        Some(self)
    }
}
