#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use ctl_core::Status;

/// A small trace record emitted by a node or its worker.
///
/// This is intentionally "dumb data" so workers can emit it cheaply from their own thread and
/// tooling can render it later.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceEvent {
    pub node: String,
    pub tag: Cow<'static, str>,
    pub status: Option<Status>,
    pub detail: Option<String>,
}

impl TraceEvent {
    pub fn new(node: impl Into<String>, tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            node: node.into(),
            tag: tag.into(),
            status: None,
            detail: None,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub trait TraceSink: Send {
    fn emit(&mut self, event: TraceEvent);
}

#[derive(Debug, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn emit(&mut self, _event: TraceEvent) {}
}

#[derive(Debug, Default)]
pub struct VecTraceSink {
    pub events: Vec<TraceEvent>,
}

impl TraceSink for VecTraceSink {
    fn emit(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceLog {
    pub events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Sending side of a [`TraceCollector`], cloned into every worker.
///
/// Emitting never blocks. Events emitted while the collector is closed are dropped.
#[derive(Debug, Clone)]
pub struct TraceHandle {
    tx: Sender<TraceEvent>,
    open: Arc<AtomicBool>,
}

impl TraceHandle {
    /// A handle wired to nothing.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel();
        Self {
            tx,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn emit(&self, event: TraceEvent) {
        if self.open.load(Ordering::Acquire) {
            let _ = self.tx.send(event);
        }
    }
}

impl Default for TraceHandle {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Collects trace events from workers and forwards them to a sink on `flush()`.
///
/// Lifecycle: `open()` when the tree is set up, `flush()` after each tick, `close()` on
/// shutdown.
pub struct TraceCollector {
    tx: Sender<TraceEvent>,
    rx: Receiver<TraceEvent>,
    open: Arc<AtomicBool>,
    sink: Box<dyn TraceSink>,
}

impl TraceCollector {
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            open: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    pub fn handle(&self) -> TraceHandle {
        TraceHandle {
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn open(&mut self) {
        self.open.store(true, Ordering::Release);
    }

    /// Forward every queued event to the sink. Returns how many were forwarded.
    pub fn flush(&mut self) -> usize {
        let mut forwarded = 0;
        for event in self.rx.try_iter() {
            self.sink.emit(event);
            forwarded += 1;
        }
        forwarded
    }

    /// Stop accepting events and forward whatever was already queued.
    pub fn close(&mut self) -> usize {
        self.open.store(false, Ordering::Release);
        self.flush()
    }

    pub fn sink_mut(&mut self) -> &mut dyn TraceSink {
        self.sink.as_mut()
    }
}

impl Default for TraceCollector {
    fn default() -> Self {
        Self::new(Box::new(NullTraceSink))
    }
}
