use ctl_core::Status;

use crate::action::ActionNode;
use crate::bt::{BtNode, NodeKind, NodeState, TickContext};
use crate::nodes::ReactiveSelector;

/// "If the goal is not already met, make it so": a reactive selector over a check and an action.
///
/// The check is re-evaluated every tick, so the action only receives `initialise`/`update` on
/// ticks where the check fails, and a check that starts succeeding pre-empts a running action.
pub struct CheckAndDo {
    state: NodeState,
    inner: ReactiveSelector,
}

impl CheckAndDo {
    pub fn new(name: impl Into<String>, check: Box<dyn BtNode>, action: ActionNode) -> Self {
        let name = name.into();
        let inner = ReactiveSelector::new(format!("{name}/selector"), vec![check, Box::new(action)]);
        Self {
            state: NodeState::new(name),
            inner,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }

    pub fn check(&self) -> &dyn BtNode {
        self.inner.children()[0].as_ref()
    }

    pub fn action(&self) -> &dyn BtNode {
        self.inner.children()[1].as_ref()
    }
}

impl BtNode for CheckAndDo {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::CheckAndDo
    }

    fn update(&mut self, ctx: &mut TickContext) -> Status {
        let status = self.inner.update(ctx);
        self.state.message = match status {
            Status::Success if self.check().status() == Status::Success => {
                "Goal already met".to_string()
            }
            Status::Success => "Goal reached by action".to_string(),
            Status::Running => "Acting".to_string(),
            Status::Failure => "Goal not reached".to_string(),
            Status::Invalid => String::new(),
        };
        status
    }

    fn terminate(&mut self, new_status: Status) {
        self.inner.terminate(new_status);
    }

    fn children(&self) -> &[Box<dyn BtNode>] {
        self.inner.children()
    }

    fn children_mut(&mut self) -> &mut [Box<dyn BtNode>] {
        self.inner.children_mut()
    }
}
