//! The tree command surface: load, drive, inspect and unload trees.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use ctl_bt::{NodeReport, Status, TickCommand, TickDriver, TickPolicy, TickSnapshot, TreeTicker};
use ctl_core::PvClient;
use ctl_tools::TraceCollector;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::build::{build_tree, BuildContext, WorkerDefaults};
use crate::config::KernelConfig;
use crate::descriptor::TreeDescriptor;
use crate::error::KernelError;
use crate::observability::{EventEmitter, KernelEvent, TracingSink};

pub type TreeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub id: TreeId,
    pub name: String,
    pub driven: bool,
    pub paused: bool,
    pub ticks: u64,
    pub status: Status,
}

/// A tick thread driving one tree.
struct Drive {
    control: Sender<TickCommand>,
    handle: JoinHandle<Status>,
    paused: bool,
}

impl Drive {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    fn join(self, tree: &str) -> Status {
        match self.handle.join() {
            Ok(status) => status,
            Err(_) => {
                tracing::error!(tree = %tree, "Tick thread panicked");
                Status::Invalid
            }
        }
    }
}

struct LoadedTree {
    name: String,
    ticker: Arc<Mutex<TreeTicker>>,
    drive: Option<Drive>,
}

impl LoadedTree {
    fn ticker(&self) -> MutexGuard<'_, TreeTicker> {
        lock(&self.ticker)
    }

    /// Join a drive loop that already ended on its own (count exhausted, sender gone).
    fn reap_finished(&mut self) {
        if self.drive.as_ref().is_some_and(|d| !d.is_active()) {
            if let Some(drive) = self.drive.take() {
                drive.join(&self.name);
            }
        }
    }
}

fn lock(ticker: &Mutex<TreeTicker>) -> MutexGuard<'_, TreeTicker> {
    ticker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every loaded tree and the threads that tick them.
pub struct TreeManager {
    pv: Arc<dyn PvClient>,
    defaults: WorkerDefaults,
    events: Option<EventEmitter>,
    trees: BTreeMap<TreeId, LoadedTree>,
}

impl TreeManager {
    pub fn new(pv: Arc<dyn PvClient>) -> Self {
        Self {
            pv,
            defaults: WorkerDefaults::default(),
            events: None,
            trees: BTreeMap::new(),
        }
    }

    /// Manager using the configured worker timing and event log.
    pub fn from_config(config: &KernelConfig, pv: Arc<dyn PvClient>) -> Self {
        Self::new(pv)
            .with_defaults(config.worker.defaults())
            .with_events(EventEmitter::new(config.events_path.clone()))
    }

    pub fn with_defaults(mut self, defaults: WorkerDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    fn record(&self, event: KernelEvent) {
        if let Some(events) = &self.events {
            events.emit_or_warn(&event);
        }
    }

    fn tree(&self, id: TreeId) -> Result<&LoadedTree, KernelError> {
        self.trees.get(&id).ok_or(KernelError::UnknownTree(id))
    }

    fn tree_mut(&mut self, id: TreeId) -> Result<&mut LoadedTree, KernelError> {
        self.trees.get_mut(&id).ok_or(KernelError::UnknownTree(id))
    }

    /// Build the tree and start its workers. The tree is not ticked until started or stepped.
    pub fn load_tree(&mut self, descriptor: &TreeDescriptor) -> Result<TreeId, KernelError> {
        let trace = TraceCollector::new(Box::new(TracingSink::new(descriptor.name.clone())));
        let ctx = BuildContext::new(self.pv.clone())
            .with_defaults(self.defaults)
            .with_trace(trace.handle());
        let root = build_tree(descriptor, &ctx)?;

        let mut ticker = TreeTicker::new(root).with_trace(trace);
        if let Some(events) = self.events.clone() {
            let tree = descriptor.name.clone();
            let mut last = Status::Invalid;
            ticker.add_post_tick_handler(move |snapshot: &TickSnapshot| {
                if snapshot.root_status == last {
                    return;
                }
                let event = KernelEvent::new(
                    "root_status",
                    &tree,
                    format!("{last} -> {}", snapshot.root_status),
                )
                .with_metadata(json!({
                    "tick": snapshot.tick,
                    "from": last,
                    "to": snapshot.root_status,
                }));
                events.emit_or_warn(&event);
                last = snapshot.root_status;
            });
        }
        ticker.setup()?;

        let id = Uuid::new_v4();
        tracing::info!(tree = %descriptor.name, %id, "Tree loaded");
        self.record(
            KernelEvent::new("tree_loaded", &descriptor.name, "Tree loaded")
                .with_metadata(json!({ "id": id })),
        );
        self.trees.insert(
            id,
            LoadedTree {
                name: descriptor.name.clone(),
                ticker: Arc::new(Mutex::new(ticker)),
                drive: None,
            },
        );
        Ok(id)
    }

    pub fn load_tree_file(&mut self, path: &Path) -> Result<TreeId, KernelError> {
        let descriptor =
            TreeDescriptor::load(path).map_err(|e| KernelError::Parse(format!("{e:#}")))?;
        self.load_tree(&descriptor)
    }

    /// Spawn the tick thread for `id` under `policy`.
    pub fn start_tree(&mut self, id: TreeId, policy: TickPolicy) -> Result<(), KernelError> {
        let tree = self.tree_mut(id)?;
        tree.reap_finished();
        if tree.drive.is_some() {
            return Err(KernelError::AlreadyRunning(id));
        }

        let (mut driver, control) = TickDriver::new(policy);
        let ticker = tree.ticker.clone();
        let handle = thread::Builder::new()
            .name(format!("tick-{}", tree.name))
            .spawn(move || {
                while driver.wait_next() {
                    lock(&ticker).tick();
                    driver.record_tick();
                }
                lock(&ticker).last_status()
            })?;
        tree.drive = Some(Drive {
            control,
            handle,
            paused: false,
        });

        let name = tree.name.clone();
        tracing::info!(tree = %name, ?policy, "Tree started");
        self.record(
            KernelEvent::new("tree_started", &name, "Tree started")
                .with_metadata(json!({ "policy": format!("{policy:?}") })),
        );
        Ok(())
    }

    fn send(&mut self, id: TreeId, command: TickCommand) -> Result<(), KernelError> {
        let tree = self.tree_mut(id)?;
        tree.reap_finished();
        let drive = tree.drive.as_mut().ok_or(KernelError::NotRunning(id))?;
        drive
            .control
            .send(command)
            .map_err(|_| KernelError::NotRunning(id))?;
        match command {
            TickCommand::Pause => drive.paused = true,
            TickCommand::Resume => drive.paused = false,
            TickCommand::Step | TickCommand::Stop => {}
        }
        Ok(())
    }

    pub fn pause_tree(&mut self, id: TreeId) -> Result<(), KernelError> {
        self.send(id, TickCommand::Pause)?;
        let name = self.tree(id)?.name.clone();
        tracing::info!(tree = %name, "Tree paused");
        self.record(KernelEvent::new("tree_paused", &name, "Tree paused"));
        Ok(())
    }

    pub fn resume_tree(&mut self, id: TreeId) -> Result<(), KernelError> {
        self.send(id, TickCommand::Resume)?;
        let name = self.tree(id)?.name.clone();
        tracing::info!(tree = %name, "Tree resumed");
        self.record(KernelEvent::new("tree_resumed", &name, "Tree resumed"));
        Ok(())
    }

    /// Release one tick of an interactive or paused tree.
    pub fn step_tree(&mut self, id: TreeId) -> Result<(), KernelError> {
        self.send(id, TickCommand::Step)
    }

    /// Tick once on the calling thread. Only allowed while no tick thread owns the tree.
    pub fn tick_once(&mut self, id: TreeId) -> Result<Status, KernelError> {
        let tree = self.tree_mut(id)?;
        tree.reap_finished();
        if tree.drive.is_some() {
            return Err(KernelError::AlreadyRunning(id));
        }
        let status = tree.ticker().tick();
        Ok(status)
    }

    /// Stop the tick thread and return the last root status. The tree stays loaded.
    pub fn stop_tree(&mut self, id: TreeId) -> Result<Status, KernelError> {
        let tree = self.tree_mut(id)?;
        let drive = tree.drive.take().ok_or(KernelError::NotRunning(id))?;
        let _ = drive.control.send(TickCommand::Stop);
        let status = drive.join(&tree.name);

        let name = tree.name.clone();
        tracing::info!(tree = %name, %status, "Tree stopped");
        self.record(
            KernelEvent::new("tree_stopped", &name, "Tree stopped")
                .with_metadata(json!({ "status": status })),
        );
        Ok(status)
    }

    /// Stop driving, shut down every worker and forget the tree.
    pub fn unload_tree(&mut self, id: TreeId) -> Result<(), KernelError> {
        let mut tree = self.trees.remove(&id).ok_or(KernelError::UnknownTree(id))?;
        if let Some(drive) = tree.drive.take() {
            let _ = drive.control.send(TickCommand::Stop);
            drive.join(&tree.name);
        }
        tree.ticker().shutdown();

        tracing::info!(tree = %tree.name, %id, "Tree unloaded");
        self.record(KernelEvent::new("tree_unloaded", &tree.name, "Tree unloaded"));
        Ok(())
    }

    /// Forward an acknowledgement. An unauthorized identity is not an error.
    pub fn acknowledge_node(
        &mut self,
        id: TreeId,
        node: &str,
        identity: &str,
    ) -> Result<(), KernelError> {
        let tree = self.tree(id)?;
        let accepted = {
            let mut ticker = tree.ticker();
            ticker.acknowledge(node, identity)?;
            ticker
                .find_node_mut(node)
                .and_then(|n| n.as_acknowledge_mut())
                .is_some_and(|ack| ack.acknowledged_by() == Some(identity))
        };

        let name = tree.name.clone();
        self.record(
            KernelEvent::new("acknowledge", &name, format!("Acknowledgement from {identity}"))
                .with_node(node)
                .with_metadata(json!({ "identity": identity, "accepted": accepted })),
        );
        Ok(())
    }

    pub fn report(&self, id: TreeId) -> Result<NodeReport, KernelError> {
        Ok(self.tree(id)?.ticker().report())
    }

    pub fn last_snapshot(&self, id: TreeId) -> Result<Option<TickSnapshot>, KernelError> {
        Ok(self.tree(id)?.ticker().last_snapshot().cloned())
    }

    pub fn list(&self) -> Vec<TreeSummary> {
        self.trees
            .iter()
            .map(|(id, tree)| {
                let ticker = tree.ticker();
                let drive = tree.drive.as_ref().filter(|d| d.is_active());
                TreeSummary {
                    id: *id,
                    name: tree.name.clone(),
                    driven: drive.is_some(),
                    paused: drive.is_some_and(|d| d.paused),
                    ticks: ticker.tick_count(),
                    status: ticker.last_status(),
                }
            })
            .collect()
    }

    /// Block until the tick thread of `id` ends on its own (e.g. a count policy runs out).
    pub fn wait_tree(&mut self, id: TreeId) -> Result<Status, KernelError> {
        let tree = self.tree_mut(id)?;
        let drive = tree.drive.take().ok_or(KernelError::NotRunning(id))?;
        Ok(drive.join(&tree.name))
    }
}

impl Drop for TreeManager {
    fn drop(&mut self) {
        let ids: Vec<TreeId> = self.trees.keys().copied().collect();
        for id in ids {
            let _ = self.unload_tree(id);
        }
    }
}
