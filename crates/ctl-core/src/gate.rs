use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct GateInner {
    set: Mutex<bool>,
    signal: Condvar,
}

/// Binary start signal from the tick thread to a worker.
///
/// Setting an already-set gate is a no-op. The worker consumes the signal with
/// [`wait_and_clear`](Self::wait_and_clear), so every new work cycle needs a fresh `set()`.
#[derive(Debug, Clone, Default)]
pub struct WorkGate {
    inner: Arc<GateInner>,
}

impl WorkGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self) {
        let mut set = self.lock();
        if !*set {
            *set = true;
            self.inner.signal.notify_all();
        }
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    pub fn clear(&self) {
        *self.lock() = false;
    }

    /// Block up to `timeout` for the gate. Returns `true` (and clears the gate) if it was set.
    pub fn wait_and_clear(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut set, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        if *set {
            *set = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn set_is_idempotent_and_consumed_once() {
        let gate = WorkGate::new();
        gate.set();
        gate.set();
        assert!(gate.wait_and_clear(Duration::from_millis(10)));
        assert!(!gate.wait_and_clear(Duration::from_millis(10)));
    }

    #[test]
    fn waiter_wakes_when_gate_is_set_from_another_thread() {
        let gate = WorkGate::new();
        let setter = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(gate.wait_and_clear(Duration::from_secs(2)));
        assert!(!gate.is_set());
        handle.join().unwrap();
    }
}
