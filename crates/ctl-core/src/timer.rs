use std::time::{Duration, Instant};

use crate::TimerError;

/// Elapsed-time gate used for work-cycle timeouts.
///
/// A periodic timer re-arms itself each time [`is_elapsed`](Self::is_elapsed) reports `true`,
/// so callers see a recurring alarm. A one-shot timer keeps reporting `true` once elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    period: Duration,
    periodic: bool,
    started: Option<Instant>,
}

impl Timer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            periodic: false,
            started: None,
        }
    }

    pub fn periodic(period: Duration) -> Self {
        Self {
            periodic: true,
            ..Self::new(period)
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Start, or restart, the timer from now.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn elapsed(&self) -> Result<Duration, TimerError> {
        self.started
            .map(|started| started.elapsed())
            .ok_or(TimerError::Uninitialized)
    }

    pub fn is_elapsed(&mut self) -> Result<bool, TimerError> {
        let started = self.started.ok_or(TimerError::Uninitialized)?;
        let now = Instant::now();
        if now.duration_since(started) < self.period {
            return Ok(false);
        }
        if self.periodic {
            self.started = Some(now);
        }
        Ok(true)
    }
}
