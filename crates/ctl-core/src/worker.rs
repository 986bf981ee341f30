use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::WorkerError;

/// Body executed on the worker thread. It is expected to poll [`KeepWorking`] and return
/// promptly once the flag drops.
pub type WorkerBody = Arc<dyn Fn(&KeepWorking) + Send + Sync>;

type StopFn = Box<dyn Fn() + Send + Sync>;

const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(200);
const STOP_POLL: Duration = Duration::from_millis(5);

/// Shared "keep working" flag handed to the worker body.
#[derive(Debug, Clone, Default)]
pub struct KeepWorking(Arc<AtomicBool>);

impl KeepWorking {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn store(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

/// Runs a body on a dedicated thread, started and stopped through a shared flag.
///
/// Lifecycle misuse (`start` twice, `stop` before `start`) is logged and reported as an error,
/// but never spawns a second thread and never blocks.
pub struct Worker {
    name: String,
    body: WorkerBody,
    keep_working: KeepWorking,
    stop_fn: Option<StopFn>,
    stop_grace: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, body: WorkerBody) -> Self {
        Self {
            name: name.into(),
            body,
            keep_working: KeepWorking::default(),
            stop_fn: None,
            stop_grace: DEFAULT_STOP_GRACE,
            handle: None,
        }
    }

    /// Hook invoked by `stop()` after the flag drops, e.g. to unblock a server loop.
    pub fn with_stop_fn(mut self, stop_fn: impl Fn() + Send + Sync + 'static) -> Self {
        self.stop_fn = Some(Box::new(stop_fn));
        self
    }

    /// How long `stop()` waits for the body to exit before detaching it.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.set_stop_grace(grace);
        self
    }

    pub fn set_stop_grace(&mut self, grace: Duration) {
        self.stop_grace = grace;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.handle.is_some() {
            tracing::error!(worker = %self.name, "Worker already started");
            return Err(WorkerError::AlreadyStarted(self.name.clone()));
        }

        // A body detached by an earlier stop keeps the old flag, which stays false.
        self.keep_working = KeepWorking::default();
        self.keep_working.store(true);
        let body = Arc::clone(&self.body);
        let keep_working = self.keep_working.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(move || body(&keep_working))
            .map_err(|e| {
                self.keep_working.store(false);
                WorkerError::Spawn {
                    name: self.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        tracing::debug!(worker = %self.name, "Worker started");
        self.handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.handle.take() else {
            tracing::error!(worker = %self.name, "Worker stop requested but it is not running");
            return Err(WorkerError::NotRunning(self.name.clone()));
        };

        self.keep_working.store(false);
        if let Some(stop_fn) = self.stop_fn.as_ref() {
            stop_fn();
        }

        let deadline = Instant::now() + self.stop_grace;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL);
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "Worker thread panicked");
            }
            tracing::debug!(worker = %self.name, "Worker stopped");
        } else {
            // Threads cannot be killed; the body will see the dropped flag on its next poll.
            tracing::warn!(
                worker = %self.name,
                grace_ms = self.stop_grace.as_millis() as u64,
                "Worker did not exit within grace window, detaching"
            );
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("stop_grace", &self.stop_grace)
            .finish_non_exhaustive()
    }
}
