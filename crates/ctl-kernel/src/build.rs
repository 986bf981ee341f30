//! Turns descriptors into runnable trees.
//!
//! Building is pure: workers are created but not started. Nothing touches a process variable
//! until the tree is set up and ticked.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ctl_bt::{
    ActionNode, ActionWork, AckCondition, BtNode, CheckAndDo, Condition, MemSelector,
    MemSequence, Parallel, Selector, Sequence, Status,
};
use ctl_core::{Comparator, PvClient, PvError, WorkError};
use ctl_tools::TraceHandle;

use crate::descriptor::{
    ActionDescriptor, ConditionItem, IncrementPvItem, NodeDescriptor, SetPvItem, TreeDescriptor,
};
use crate::error::BuildError;

/// Timing applied to action nodes that leave it unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDefaults {
    pub loop_period: Duration,
    pub timeout: Duration,
    pub stop_grace: Duration,
    pub gate_poll: Duration,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            loop_period: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
            stop_grace: Duration::from_millis(200),
            gate_poll: Duration::from_millis(50),
        }
    }
}

/// What builders need besides the descriptor.
#[derive(Clone)]
pub struct BuildContext {
    pub pv: Arc<dyn PvClient>,
    pub defaults: WorkerDefaults,
    pub trace: TraceHandle,
}

impl BuildContext {
    pub fn new(pv: Arc<dyn PvClient>) -> Self {
        Self {
            pv,
            defaults: WorkerDefaults::default(),
            trace: TraceHandle::disconnected(),
        }
    }

    pub fn with_defaults(mut self, defaults: WorkerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_trace(mut self, trace: TraceHandle) -> Self {
        self.trace = trace;
        self
    }
}

/// Check the whole descriptor before anything is constructed.
pub fn validate(descriptor: &TreeDescriptor) -> Result<(), BuildError> {
    let mut names = BTreeSet::new();
    validate_node(&descriptor.root, &mut names)
}

fn claim_name(name: &str, names: &mut BTreeSet<String>) -> Result<(), BuildError> {
    if name.trim().is_empty() {
        return Err(BuildError::EmptyName);
    }
    if !names.insert(name.to_string()) {
        return Err(BuildError::DuplicateName(name.to_string()));
    }
    Ok(())
}

fn require_pv(node: &str, pv: &str) -> Result<(), BuildError> {
    if pv.trim().is_empty() {
        return Err(BuildError::EmptyPv(node.to_string()));
    }
    Ok(())
}

fn require_positive(node: &str, field: &'static str, value: Option<u64>) -> Result<(), BuildError> {
    if value == Some(0) {
        return Err(BuildError::NonPositive {
            node: node.to_string(),
            field,
        });
    }
    Ok(())
}

struct ActionFields<'a> {
    name: &'a str,
    pv: &'a str,
    loop_period_ms: Option<u64>,
    timeout_ms: Option<u64>,
    termination_check: Option<&'a ConditionItem>,
}

impl<'a> From<&'a SetPvItem> for ActionFields<'a> {
    fn from(item: &'a SetPvItem) -> Self {
        Self {
            name: &item.name,
            pv: &item.pv,
            loop_period_ms: item.loop_period_ms,
            timeout_ms: item.timeout_ms,
            termination_check: item.termination_check.as_ref(),
        }
    }
}

impl<'a> From<&'a IncrementPvItem> for ActionFields<'a> {
    fn from(item: &'a IncrementPvItem) -> Self {
        Self {
            name: &item.name,
            pv: &item.pv,
            loop_period_ms: item.loop_period_ms,
            timeout_ms: item.timeout_ms,
            termination_check: item.termination_check.as_ref(),
        }
    }
}

fn validate_action(
    action: &ActionDescriptor,
    names: &mut BTreeSet<String>,
) -> Result<(), BuildError> {
    match action {
        ActionDescriptor::SetPv(item) => validate_action_fields(item.into(), names),
        ActionDescriptor::IncrementPv(item) => validate_increment(item, names),
    }
}

fn validate_increment(
    item: &IncrementPvItem,
    names: &mut BTreeSet<String>,
) -> Result<(), BuildError> {
    if !item.increment.is_numeric() {
        return Err(BuildError::NonNumericIncrement(item.name.clone()));
    }
    validate_action_fields(item.into(), names)
}

fn validate_action_fields(
    fields: ActionFields<'_>,
    names: &mut BTreeSet<String>,
) -> Result<(), BuildError> {
    claim_name(fields.name, names)?;
    require_pv(fields.name, fields.pv)?;
    require_positive(fields.name, "loop_period_ms", fields.loop_period_ms)?;
    require_positive(fields.name, "timeout_ms", fields.timeout_ms)?;
    if let Some(check) = fields.termination_check {
        require_pv(fields.name, &check.pv)?;
    }
    Ok(())
}

fn validate_node(node: &NodeDescriptor, names: &mut BTreeSet<String>) -> Result<(), BuildError> {
    match node {
        NodeDescriptor::Condition(item) => {
            claim_name(&item.name, names)?;
            require_pv(&item.name, &item.pv)
        }
        NodeDescriptor::Acknowledge(item) => {
            claim_name(&item.name, names)?;
            if item.permitted.is_empty() {
                return Err(BuildError::NoPermittedIdentities(item.name.clone()));
            }
            Ok(())
        }
        NodeDescriptor::SetPv(item) => validate_action_fields(item.into(), names),
        NodeDescriptor::IncrementPv(item) => validate_increment(item, names),
        NodeDescriptor::Sequence(item) | NodeDescriptor::Selector(item) => {
            validate_composite(&item.name, &item.children, names)
        }
        NodeDescriptor::Parallel(item) => validate_composite(&item.name, &item.children, names),
        NodeDescriptor::CheckAndDo(item) => {
            claim_name(&item.name, names)?;
            claim_name(&item.check.name, names)?;
            require_pv(&item.check.name, &item.check.pv)?;
            validate_action(&item.action, names)
        }
    }
}

fn validate_composite(
    name: &str,
    children: &[NodeDescriptor],
    names: &mut BTreeSet<String>,
) -> Result<(), BuildError> {
    claim_name(name, names)?;
    if children.is_empty() {
        return Err(BuildError::NoChildren(name.to_string()));
    }
    children.iter().try_for_each(|child| validate_node(child, names))
}

/// Validate and build a tree. The returned root has not been set up.
pub fn build_tree(
    descriptor: &TreeDescriptor,
    ctx: &BuildContext,
) -> Result<Box<dyn BtNode>, BuildError> {
    validate(descriptor)?;
    let root = build_node(&descriptor.root, ctx);
    tracing::debug!(tree = %descriptor.name, root = %root.name(), "Tree built");
    Ok(root)
}

fn build_node(node: &NodeDescriptor, ctx: &BuildContext) -> Box<dyn BtNode> {
    match node {
        NodeDescriptor::Condition(item) => build_condition(item, ctx),
        NodeDescriptor::Acknowledge(item) => Box::new(
            AckCondition::new(item.name.clone(), item.permitted.iter().cloned())
                .with_description(item.description.clone()),
        ),
        NodeDescriptor::SetPv(item) => Box::new(build_set_pv(item, None, ctx)),
        NodeDescriptor::IncrementPv(item) => Box::new(build_increment_pv(item, None, ctx)),
        NodeDescriptor::Sequence(item) => {
            let children = build_children(&item.children, ctx);
            if item.memory {
                Box::new(
                    MemSequence::new(item.name.clone(), children)
                        .with_description(item.description.clone()),
                )
            } else {
                Box::new(
                    Sequence::new(item.name.clone(), children)
                        .with_description(item.description.clone()),
                )
            }
        }
        NodeDescriptor::Selector(item) => {
            let children = build_children(&item.children, ctx);
            if item.memory {
                Box::new(
                    MemSelector::new(item.name.clone(), children)
                        .with_description(item.description.clone()),
                )
            } else {
                Box::new(
                    Selector::new(item.name.clone(), children)
                        .with_description(item.description.clone()),
                )
            }
        }
        NodeDescriptor::Parallel(item) => Box::new(
            Parallel::new(item.name.clone(), item.policy, build_children(&item.children, ctx))
                .with_synchronise(item.synchronise)
                .with_description(item.description.clone()),
        ),
        NodeDescriptor::CheckAndDo(item) => {
            // Without its own termination check the action stops as soon as the goal holds.
            let goal = Some(&item.check);
            let action = match &item.action {
                ActionDescriptor::SetPv(action) => build_set_pv(action, goal, ctx),
                ActionDescriptor::IncrementPv(action) => build_increment_pv(action, goal, ctx),
            };
            Box::new(
                CheckAndDo::new(item.name.clone(), build_condition(&item.check, ctx), action)
                    .with_description(item.description.clone()),
            )
        }
    }
}

fn build_children(children: &[NodeDescriptor], ctx: &BuildContext) -> Vec<Box<dyn BtNode>> {
    children.iter().map(|child| build_node(child, ctx)).collect()
}

/// `pv <operator> value`, read through the client.
fn pv_check(
    item: &ConditionItem,
    pv: Arc<dyn PvClient>,
) -> impl Fn() -> Result<bool, PvError> + Send + Sync + 'static {
    let item = item.clone();
    move || {
        let actual = pv.read(&item.pv)?;
        Ok(item.operator.evaluate(&actual, &item.value))
    }
}

fn build_condition(item: &ConditionItem, ctx: &BuildContext) -> Box<dyn BtNode> {
    let check = pv_check(item, ctx.pv.clone());
    let name = item.name.clone();
    let predicate = move || match check() {
        Ok(satisfied) => satisfied,
        Err(e) => {
            tracing::warn!(node = %name, error = %e, "Condition read failed");
            false
        }
    };
    Box::new(
        Condition::new(item.name.clone(), predicate).with_description(item.description.clone()),
    )
}

fn timing(
    work: ActionWork,
    loop_period_ms: Option<u64>,
    timeout_ms: Option<u64>,
    ctx: &BuildContext,
) -> ActionWork {
    work.with_loop_period(loop_period_ms.map_or(ctx.defaults.loop_period, Duration::from_millis))
        .with_timeout(timeout_ms.map_or(ctx.defaults.timeout, Duration::from_millis))
        .with_gate_poll(ctx.defaults.gate_poll)
        .with_trace(ctx.trace.clone())
}

/// Completion is the action's own termination check, else `goal`, else `pv == value`.
fn build_set_pv(item: &SetPvItem, goal: Option<&ConditionItem>, ctx: &BuildContext) -> ActionNode {
    let pv = ctx.pv.clone();
    let (target, value) = (item.pv.clone(), item.value.clone());
    let step = move || -> Result<Status, WorkError> {
        pv.write(&target, value.clone())?;
        Ok(Status::Running)
    };

    let default_check = ConditionItem {
        name: format!("{}/done", item.name),
        description: String::new(),
        pv: item.pv.clone(),
        operator: Comparator::Eq,
        value: item.value.clone(),
    };
    let check = item
        .termination_check
        .as_ref()
        .or(goal)
        .unwrap_or(&default_check);
    let check = pv_check(check, ctx.pv.clone());
    let work = ActionWork::new(step).with_completion(move || Ok(check()?));

    ActionNode::new(item.name.clone(), timing(work, item.loop_period_ms, item.timeout_ms, ctx))
        .with_description(item.description.clone())
        .with_stop_grace(ctx.defaults.stop_grace)
}

/// Completion is the action's own termination check, else `goal`, else never.
fn build_increment_pv(
    item: &IncrementPvItem,
    goal: Option<&ConditionItem>,
    ctx: &BuildContext,
) -> ActionNode {
    let pv = ctx.pv.clone();
    let (target, increment) = (item.pv.clone(), item.increment.clone());
    let step = move || -> Result<Status, WorkError> {
        let current = pv.read(&target)?;
        let next = current.checked_add(&increment).ok_or_else(|| {
            WorkError::failed(format!("cannot add {increment} to {target} = {current}"))
        })?;
        pv.write(&target, next)?;
        Ok(Status::Running)
    };

    let mut work = ActionWork::new(step);
    if let Some(check) = item.termination_check.as_ref().or(goal) {
        let check = pv_check(check, ctx.pv.clone());
        work = work.with_completion(move || Ok(check()?));
    }

    ActionNode::new(item.name.clone(), timing(work, item.loop_period_ms, item.timeout_ms, ctx))
        .with_description(item.description.clone())
        .with_stop_grace(ctx.defaults.stop_grace)
}
