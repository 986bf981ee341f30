use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use ctl_core::Status;
use ctl_tools::{TraceCollector, TraceHandle};

use crate::bt::{BtError, BtNode, TickContext, Visit};
use crate::report::{find_node_mut, NodeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPolicy {
    /// Tick forever with a fixed delay between ticks.
    Continuous { period: Duration },
    /// Tick only when a [`TickCommand::Step`] arrives.
    Interactive,
    /// Tick `ticks` times with a fixed delay, regardless of status.
    Count { ticks: u64, period: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickCommand {
    Pause,
    Resume,
    Step,
    Stop,
}

/// What post-tick handlers see: which nodes were visited and how they resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSnapshot {
    pub tick: u64,
    pub root_status: Status,
    pub visited: Vec<Visit>,
}

/// Decides, between ticks, whether to tick now, wait, or stop.
pub struct TickDriver {
    policy: TickPolicy,
    commands: Option<Receiver<TickCommand>>,
    paused: bool,
    ticks: u64,
    last_tick: Option<Instant>,
}

impl TickDriver {
    /// Driver plus the sender used to pause, resume, step or stop it. Dropping the sender stops
    /// the driver.
    pub fn new(policy: TickPolicy) -> (Self, Sender<TickCommand>) {
        let (tx, rx) = mpsc::channel();
        let driver = Self {
            policy,
            commands: Some(rx),
            paused: false,
            ticks: 0,
            last_tick: None,
        };
        (driver, tx)
    }

    /// Driver that follows its policy with no external control.
    pub fn uncontrolled(policy: TickPolicy) -> Self {
        Self {
            policy,
            commands: None,
            paused: false,
            ticks: 0,
            last_tick: None,
        }
    }

    pub fn policy(&self) -> TickPolicy {
        self.policy
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Block until the next tick is due. Returns `false` once driving should end.
    pub fn wait_next(&mut self) -> bool {
        let period = match self.policy {
            TickPolicy::Count { ticks, .. } if self.ticks >= ticks => return false,
            TickPolicy::Continuous { period } | TickPolicy::Count { period, .. } => period,
            TickPolicy::Interactive => return self.wait_for_step(),
        };

        loop {
            if self.paused {
                return self.wait_for_step();
            }
            let due = self.last_tick.map_or_else(Instant::now, |last| last + period);
            let remaining = due.saturating_duration_since(Instant::now());

            let Some(commands) = self.commands.as_ref() else {
                thread::sleep(remaining);
                return true;
            };
            match commands.recv_timeout(remaining) {
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
                Ok(TickCommand::Step) => return true,
                Ok(TickCommand::Stop) => return false,
                Ok(TickCommand::Pause) => self.paused = true,
                Ok(TickCommand::Resume) => {}
            }
        }
    }

    /// Wait while paused (or in interactive mode) for a command that releases one tick.
    fn wait_for_step(&mut self) -> bool {
        let Some(commands) = self.commands.as_ref() else {
            return false;
        };
        loop {
            match commands.recv() {
                Err(_) | Ok(TickCommand::Stop) => return false,
                Ok(TickCommand::Step) => return true,
                Ok(TickCommand::Pause) => self.paused = true,
                Ok(TickCommand::Resume) => {
                    self.paused = false;
                    if self.policy != TickPolicy::Interactive {
                        return true;
                    }
                }
            }
        }
    }

    pub fn record_tick(&mut self) {
        self.ticks += 1;
        self.last_tick = Some(Instant::now());
    }
}

type PostTickHandler = Box<dyn FnMut(&TickSnapshot) + Send>;

/// Owns a tree root and drives it one tick at a time.
pub struct TreeTicker {
    root: Box<dyn BtNode>,
    trace: TraceCollector,
    post_tick: Vec<PostTickHandler>,
    tick_count: u64,
    last_status: Status,
    last_snapshot: Option<TickSnapshot>,
    is_set_up: bool,
}

impl TreeTicker {
    pub fn new(root: Box<dyn BtNode>) -> Self {
        Self {
            root,
            trace: TraceCollector::default(),
            post_tick: Vec::new(),
            tick_count: 0,
            last_status: Status::Invalid,
            last_snapshot: None,
            is_set_up: false,
        }
    }

    /// Use `trace` as this tree's collector. Hand out its handles before building actions.
    pub fn with_trace(mut self, trace: TraceCollector) -> Self {
        self.trace = trace;
        self
    }

    pub fn trace_handle(&self) -> TraceHandle {
        self.trace.handle()
    }

    pub fn add_post_tick_handler(&mut self, handler: impl FnMut(&TickSnapshot) + Send + 'static) {
        self.post_tick.push(Box::new(handler));
    }

    /// Set up every node (starting action workers). Safe to call more than once.
    pub fn setup(&mut self) -> Result<(), BtError> {
        if self.is_set_up {
            return Ok(());
        }
        self.trace.open();
        self.root.setup()?;
        self.is_set_up = true;
        tracing::info!(root = %self.root.name(), "Tree set up");
        Ok(())
    }

    pub fn is_set_up(&self) -> bool {
        self.is_set_up
    }

    pub fn tick(&mut self) -> Status {
        if !self.is_set_up {
            tracing::warn!(
                root = %self.root.name(),
                "Ticking a tree that was never set up; actions have no workers"
            );
        }
        let mut ctx = TickContext::new(self.tick_count);
        let status = self.root.tick(&mut ctx);
        if status != self.last_status {
            tracing::info!(
                root = %self.root.name(),
                tick = self.tick_count,
                from = %self.last_status,
                to = %status,
                "Root status changed"
            );
        }

        let snapshot = TickSnapshot {
            tick: self.tick_count,
            root_status: status,
            visited: ctx.into_visited(),
        };
        for handler in self.post_tick.iter_mut() {
            handler(&snapshot);
        }
        self.trace.flush();

        self.last_snapshot = Some(snapshot);
        self.last_status = status;
        self.tick_count += 1;
        status
    }

    /// Set up if needed, then drive ticks until the driver says stop. Returns the last root
    /// status.
    pub fn run(&mut self, driver: &mut TickDriver) -> Result<Status, BtError> {
        self.setup()?;
        while driver.wait_next() {
            self.tick();
            driver.record_tick();
        }
        Ok(self.last_status)
    }

    /// Stop every worker for good and close the trace collector.
    pub fn shutdown(&mut self) {
        self.root.shutdown();
        self.trace.close();
        self.is_set_up = false;
        tracing::info!(root = %self.root.name(), "Tree shut down");
    }

    pub fn root(&self) -> &dyn BtNode {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> &mut dyn BtNode {
        self.root.as_mut()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub fn last_snapshot(&self) -> Option<&TickSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn report(&self) -> NodeReport {
        NodeReport::of(self.root.as_ref())
    }

    pub fn find_node_mut(&mut self, name: &str) -> Option<&mut dyn BtNode> {
        find_node_mut(self.root.as_mut(), name)
    }

    /// Forward an acknowledgement to the named node. Only a missing or non-acknowledgeable node
    /// is an error; an unauthorized identity is silently ignored by the node.
    pub fn acknowledge(&mut self, node: &str, identity: &str) -> Result<(), BtError> {
        let found = self
            .find_node_mut(node)
            .ok_or_else(|| BtError::NodeNotFound(node.to_string()))?;
        let ack = found
            .as_acknowledge_mut()
            .ok_or_else(|| BtError::NotAcknowledgeable(node.to_string()))?;
        ack.acknowledge(identity);
        Ok(())
    }
}

impl Drop for TreeTicker {
    fn drop(&mut self) {
        if self.is_set_up {
            self.shutdown();
        }
    }
}
