use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ctl_core::{KeepWorking, Status, StatusCell, Timer, WorkError, WorkGate, Worker, WorkerBody};
use ctl_tools::{TraceEvent, TraceHandle};

use crate::bt::{BtError, BtNode, NodeKind, NodeState, TickContext};

type WorkStep = Arc<dyn Fn() -> Result<Status, WorkError> + Send + Sync>;
type CompletionCheck = Arc<dyn Fn() -> Result<bool, WorkError> + Send + Sync>;

const DEFAULT_LOOP_PERIOD: Duration = Duration::from_millis(100);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_GATE_POLL: Duration = Duration::from_millis(50);

/// What an action does, reduced to a single step plus a completion check.
///
/// The step is the only thing a caller writes. [`ActionWork::into_worker_body`] wraps it in the
/// full work-cycle protocol:
///
/// 1. wait on the work gate and consume the signal;
/// 2. write `Running` and start the cycle timer;
/// 3. while the completion check is false and the timer has not elapsed, run one step and
///    write its status (a step error or panic writes `Failure` and ends the loop), then sleep
///    the loop period;
/// 4. run the completion check one last time: `Success` if it holds, `Failure` otherwise;
/// 5. go back to waiting on the gate.
#[derive(Clone)]
pub struct ActionWork {
    step: WorkStep,
    completion: CompletionCheck,
    loop_period: Duration,
    timeout: Duration,
    gate_poll: Duration,
    trace: TraceHandle,
}

impl ActionWork {
    /// Without a completion check the cycle always ends on timeout (or step error) as `Failure`.
    pub fn new(step: impl Fn() -> Result<Status, WorkError> + Send + Sync + 'static) -> Self {
        Self {
            step: Arc::new(step),
            completion: Arc::new(|| Ok(false)),
            loop_period: DEFAULT_LOOP_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            gate_poll: DEFAULT_GATE_POLL,
            trace: TraceHandle::disconnected(),
        }
    }

    pub fn with_completion(
        mut self,
        completion: impl Fn() -> Result<bool, WorkError> + Send + Sync + 'static,
    ) -> Self {
        self.completion = Arc::new(completion);
        self
    }

    pub fn with_loop_period(mut self, loop_period: Duration) -> Self {
        self.loop_period = loop_period;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How often an idle worker wakes to check whether it should exit.
    pub fn with_gate_poll(mut self, gate_poll: Duration) -> Self {
        self.gate_poll = gate_poll;
        self
    }

    pub fn with_trace(mut self, trace: TraceHandle) -> Self {
        self.trace = trace;
        self
    }

    pub fn loop_period(&self) -> Duration {
        self.loop_period
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn into_worker_body(
        self,
        node: impl Into<String>,
        cell: StatusCell,
        gate: WorkGate,
    ) -> WorkerBody {
        let cycle = WorkCycle {
            node: node.into(),
            work: self,
            cell,
        };
        Arc::new(move |keep_working: &KeepWorking| {
            let mut timer = Timer::new(cycle.work.timeout);
            while keep_working.is_set() {
                if !gate.wait_and_clear(cycle.work.gate_poll) {
                    continue;
                }
                let attempt = cycle.cell.current_attempt();
                cycle.run(attempt, &mut timer, keep_working);
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleExit {
    Completed,
    TimedOut,
    StepFailed,
    Stopped,
}

struct WorkCycle {
    node: String,
    work: ActionWork,
    cell: StatusCell,
}

impl WorkCycle {
    fn write(&self, attempt: u64, status: Status) {
        if !self.cell.set_if_current(attempt, status) {
            tracing::debug!(node = %self.node, %status, "Discarding result of superseded attempt");
        }
    }

    fn is_complete(&self) -> Result<bool, WorkError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.work.completion)()))
            .unwrap_or_else(|payload| Err(WorkError::Panicked(panic_message(payload))))
    }

    fn step(&self) -> Result<Status, WorkError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.work.step)()))
            .unwrap_or_else(|payload| Err(WorkError::Panicked(panic_message(payload))))
    }

    fn run(&self, attempt: u64, timer: &mut Timer, keep_working: &KeepWorking) -> Status {
        self.write(attempt, Status::Running);
        timer.start();
        self.work
            .trace
            .emit(TraceEvent::new(self.node.as_str(), "cycle.start").with_status(Status::Running));

        let exit = loop {
            if !keep_working.is_set() {
                break CycleExit::Stopped;
            }
            match self.is_complete() {
                Ok(true) => break CycleExit::Completed,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(node = %self.node, error = %e, "Completion check failed");
                }
            }
            if timer.is_elapsed().unwrap_or(true) {
                break CycleExit::TimedOut;
            }

            match self.step() {
                Ok(status) => self.write(attempt, status),
                Err(e) => {
                    tracing::warn!(node = %self.node, error = %e, "Work step failed");
                    self.work.trace.emit(
                        TraceEvent::new(self.node.as_str(), "cycle.step_failed")
                            .with_status(Status::Failure)
                            .with_detail(e.to_string()),
                    );
                    self.write(attempt, Status::Failure);
                    break CycleExit::StepFailed;
                }
            }
            thread::sleep(self.work.loop_period);
        };

        if exit == CycleExit::TimedOut {
            tracing::info!(
                node = %self.node,
                timeout_ms = self.work.timeout.as_millis() as u64,
                "Work cycle timed out"
            );
        }

        // The last step's effect may only now be visible; this check has the final word.
        let status = match self.is_complete() {
            Ok(done) => Status::from(done),
            Err(e) => {
                tracing::warn!(node = %self.node, error = %e, "Final completion check failed");
                Status::Failure
            }
        };
        self.write(attempt, status);
        tracing::debug!(node = %self.node, %status, exit = ?exit, "Work cycle finished");
        self.work.trace.emit(
            TraceEvent::new(self.node.as_str(), "cycle.end")
                .with_status(status)
                .with_detail(format!("{exit:?}")),
        );
        status
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Leaf bound to a persistent worker thread.
///
/// `initialise` opens a new attempt and signals the work gate; `update` only reads the status
/// cell and never blocks. The worker outlives individual cycles and is stopped by `shutdown`
/// (or when the node is dropped).
pub struct ActionNode {
    state: NodeState,
    cell: StatusCell,
    gate: WorkGate,
    worker: Worker,
    is_set_up: bool,
}

impl ActionNode {
    pub fn new(name: impl Into<String>, work: ActionWork) -> Self {
        let name = name.into();
        let cell = StatusCell::new();
        let gate = WorkGate::new();
        let body = work.into_worker_body(name.clone(), cell.clone(), gate.clone());
        Self {
            worker: Worker::new(name.clone(), body),
            state: NodeState::new(name),
            cell,
            gate,
            is_set_up: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.state.description = description.into();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.worker.set_stop_grace(grace);
        self
    }

    pub fn is_set_up(&self) -> bool {
        self.is_set_up
    }

    /// Status most recently written by the worker (or by `initialise`).
    pub fn worker_status(&self) -> Status {
        self.cell.get()
    }
}

impl BtNode for ActionNode {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Action
    }

    fn setup(&mut self) -> Result<(), BtError> {
        if self.is_set_up {
            return Ok(());
        }
        self.worker.start()?;
        self.is_set_up = true;
        Ok(())
    }

    fn initialise(&mut self) {
        let attempt = self.cell.begin_attempt();
        self.gate.set();
        self.state.message.clear();
        tracing::debug!(node = %self.state.name, attempt, "Action initialised");
    }

    fn update(&mut self, _ctx: &mut TickContext) -> Status {
        let status = self.cell.get();
        match status {
            Status::Success => self.state.message = "Action complete".to_string(),
            Status::Failure => self.state.message = "Action failed".to_string(),
            Status::Running | Status::Invalid => {}
        }
        status
    }

    fn terminate(&mut self, new_status: Status) {
        if new_status == Status::Invalid {
            tracing::debug!(
                node = %self.state.name,
                "Action abandoned; worker cycle left to finish on its own"
            );
        } else {
            tracing::debug!(node = %self.state.name, status = %new_status, "Action terminated");
        }
    }

    fn shutdown(&mut self) {
        if !self.is_set_up {
            return;
        }
        let _ = self.worker.stop();
        self.is_set_up = false;
    }
}

impl Drop for ActionNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
