use std::sync::{Arc, Mutex};

use ctl_bt::{
    BtNode, MemSelector, MemSequence, NodeKind, NodeState, Parallel, ParallelPolicy, Selector,
    Sequence, Status, TickContext,
};

/// Leaf whose result is set from outside; counts how often it is ticked.
struct Scripted {
    state: NodeState,
    next: Arc<Mutex<Status>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl BtNode for Scripted {
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
        self.log.lock().unwrap().push(self.state.name.clone());
        *self.next.lock().unwrap()
    }
}

struct Harness {
    log: Arc<Mutex<Vec<String>>>,
    scripts: Vec<Arc<Mutex<Status>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            log: Arc::default(),
            scripts: Vec::new(),
        }
    }

    fn leaf(&mut self, name: &str, status: Status) -> Box<dyn BtNode> {
        let next = Arc::new(Mutex::new(status));
        self.scripts.push(next.clone());
        Box::new(Scripted {
            state: NodeState::new(name),
            next,
            log: self.log.clone(),
        })
    }

    fn set(&self, index: usize, status: Status) {
        *self.scripts[index].lock().unwrap() = status;
    }

    fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

fn tick(node: &mut dyn BtNode) -> Status {
    let mut ctx = TickContext::new(0);
    node.tick(&mut ctx)
}

#[test]
fn sequence_stops_at_first_running_child() {
    let mut h = Harness::new();
    let children = vec![
        h.leaf("a", Status::Success),
        h.leaf("b", Status::Running),
        h.leaf("c", Status::Success),
    ];
    let mut seq = Sequence::new("seq", children);

    assert_eq!(tick(&mut seq), Status::Running);
    assert_eq!(h.take_log(), vec!["a", "b"]);
    assert_eq!(seq.children()[2].status(), Status::Invalid);
}

#[test]
fn sequence_ticks_every_child_when_all_succeed() {
    let mut h = Harness::new();
    let children = vec![
        h.leaf("a", Status::Success),
        h.leaf("b", Status::Success),
        h.leaf("c", Status::Success),
    ];
    let mut seq = Sequence::new("seq", children);

    assert_eq!(tick(&mut seq), Status::Success);
    assert_eq!(h.take_log(), vec!["a", "b", "c"]);
}

#[test]
fn sequence_returns_first_failure() {
    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Failure), h.leaf("b", Status::Success)];
    let mut seq = Sequence::new("seq", children);

    assert_eq!(tick(&mut seq), Status::Failure);
    assert_eq!(h.take_log(), vec!["a"]);
}

#[test]
fn memory_sequence_resumes_from_running_child() {
    let mut h = Harness::new();
    let children = vec![
        h.leaf("a", Status::Success),
        h.leaf("b", Status::Running),
        h.leaf("c", Status::Success),
    ];
    let mut seq = MemSequence::new("seq", children);

    assert_eq!(tick(&mut seq), Status::Running);
    assert_eq!(h.take_log(), vec!["a", "b"]);

    assert_eq!(tick(&mut seq), Status::Running);
    assert_eq!(h.take_log(), vec!["b"]);

    h.set(1, Status::Success);
    assert_eq!(tick(&mut seq), Status::Success);
    assert_eq!(h.take_log(), vec!["b", "c"]);

    // A finished cycle starts again from the first child.
    assert_eq!(tick(&mut seq), Status::Success);
    assert_eq!(h.take_log(), vec!["a", "b", "c"]);
}

#[test]
fn reactive_sequence_rechecks_earlier_children() {
    let mut h = Harness::new();
    let children = vec![h.leaf("guard", Status::Success), h.leaf("work", Status::Running)];
    let mut seq = Sequence::new("seq", children);

    assert_eq!(tick(&mut seq), Status::Running);
    assert_eq!(tick(&mut seq), Status::Running);
    assert_eq!(h.take_log(), vec!["guard", "work", "guard", "work"]);

    h.set(0, Status::Failure);
    assert_eq!(tick(&mut seq), Status::Failure);
    assert_eq!(h.take_log(), vec!["guard"]);
    // The running child was abandoned.
    assert_eq!(seq.children()[1].status(), Status::Invalid);
}

#[test]
fn selector_rechecks_failed_condition_before_the_next_child() {
    let mut h = Harness::new();
    let children = vec![h.leaf("check", Status::Failure), h.leaf("do", Status::Success)];
    let mut sel = Selector::new("sel", children);

    assert_eq!(tick(&mut sel), Status::Success);
    assert_eq!(h.take_log(), vec!["check", "do"]);
}

#[test]
fn selector_short_circuits_on_first_success() {
    let mut h = Harness::new();
    let children = vec![h.leaf("check", Status::Success), h.leaf("do", Status::Running)];
    let mut sel = Selector::new("sel", children);

    assert_eq!(tick(&mut sel), Status::Success);
    assert_eq!(h.take_log(), vec!["check"]);
}

#[test]
fn selector_fails_when_every_child_fails() {
    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Failure), h.leaf("b", Status::Failure)];
    let mut sel = Selector::new("sel", children);

    assert_eq!(tick(&mut sel), Status::Failure);
    assert_eq!(h.take_log(), vec!["a", "b"]);
}

#[test]
fn reactive_selector_preempts_running_child_when_condition_flips() {
    let mut h = Harness::new();
    let children = vec![h.leaf("check", Status::Failure), h.leaf("do", Status::Running)];
    let mut sel = Selector::new("sel", children);

    assert_eq!(tick(&mut sel), Status::Running);
    assert_eq!(sel.children()[1].status(), Status::Running);

    h.set(0, Status::Success);
    assert_eq!(tick(&mut sel), Status::Success);
    assert_eq!(sel.children()[1].status(), Status::Invalid);
    assert_eq!(h.take_log(), vec!["check", "do", "check"]);
}

#[test]
fn memory_selector_does_not_recheck_failed_children_while_running() {
    let mut h = Harness::new();
    let children = vec![h.leaf("check", Status::Failure), h.leaf("do", Status::Running)];
    let mut sel = MemSelector::new("sel", children);

    assert_eq!(tick(&mut sel), Status::Running);
    h.set(0, Status::Success);
    assert_eq!(tick(&mut sel), Status::Running);
    assert_eq!(h.take_log(), vec!["check", "do", "do"]);
}

#[test]
fn parallel_ticks_all_children_and_applies_policy() {
    let mut h = Harness::new();
    let children = vec![
        h.leaf("a", Status::Success),
        h.leaf("b", Status::Running),
        h.leaf("c", Status::Success),
    ];
    let mut all = Parallel::new("all", ParallelPolicy::SuccessOnAll, children);
    assert_eq!(tick(&mut all), Status::Running);
    assert_eq!(h.take_log(), vec!["a", "b", "c"]);

    h.set(1, Status::Success);
    assert_eq!(tick(&mut all), Status::Success);

    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Running), h.leaf("b", Status::Success)];
    let mut one = Parallel::new("one", ParallelPolicy::SuccessOnOne, children);
    assert_eq!(tick(&mut one), Status::Success);
    assert_eq!(h.take_log(), vec!["a", "b"]);
    // The still-running child is halted once the parallel resolves.
    assert_eq!(one.children()[0].status(), Status::Invalid);
}

#[test]
fn parallel_fails_on_any_failure() {
    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Success), h.leaf("b", Status::Failure)];
    let mut par = Parallel::new("par", ParallelPolicy::SuccessOnOne, children);
    assert_eq!(tick(&mut par), Status::Failure);
}

#[test]
fn synchronised_parallel_skips_settled_children() {
    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Success), h.leaf("b", Status::Running)];
    let mut par =
        Parallel::new("par", ParallelPolicy::SuccessOnAll, children).with_synchronise(true);

    assert_eq!(tick(&mut par), Status::Running);
    assert_eq!(tick(&mut par), Status::Running);
    assert_eq!(h.take_log(), vec!["a", "b", "b"]);
}

#[test]
fn tick_context_records_visits_in_completion_order() {
    let mut h = Harness::new();
    let children = vec![h.leaf("a", Status::Success), h.leaf("b", Status::Running)];
    let mut seq = Sequence::new("seq", children);

    let mut ctx = TickContext::new(7);
    seq.tick(&mut ctx);
    let names: Vec<_> = ctx.visited().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "seq"]);
    assert!(!ctx.was_visited("c"));
}
