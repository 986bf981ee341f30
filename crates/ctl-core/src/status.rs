use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result of evaluating a node.
///
/// Discriminants are fixed so a status can cross an isolation boundary as a plain `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u8)]
pub enum Status {
    /// Never ticked, or reset.
    #[default]
    Invalid = 0,
    Running = 1,
    Success = 2,
    Failure = 3,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Invalid,
        Status::Running,
        Status::Success,
        Status::Failure,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Invalid),
            1 => Some(Status::Running),
            2 => Some(Status::Success),
            3 => Some(Status::Failure),
            _ => None,
        }
    }

    /// `Success` or `Failure`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Invalid => "INVALID",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
        }
    }
}

impl From<bool> for Status {
    fn from(value: bool) -> Self {
        if value {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CellState {
    status: Status,
    attempt: u64,
}

/// Lock-guarded status shared between one action node and its worker.
///
/// Cloning produces another handle to the same cell. Besides the raw `get`/`set`, the cell
/// tracks an attempt counter: the tick thread opens a new attempt with
/// [`begin_attempt`](Self::begin_attempt) and a worker cycle writes through
/// [`set_if_current`](Self::set_if_current), so the late result of an abandoned cycle can
/// never overwrite the status of a newer one.
#[derive(Debug, Clone, Default)]
pub struct StatusCell {
    inner: Arc<Mutex<CellState>>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Status {
        self.lock().status
    }

    pub fn set(&self, status: Status) {
        self.lock().status = status;
    }

    /// Mark a new attempt as `Running` and return its id.
    pub fn begin_attempt(&self) -> u64 {
        let mut state = self.lock();
        state.attempt = state.attempt.wrapping_add(1);
        state.status = Status::Running;
        state.attempt
    }

    pub fn current_attempt(&self) -> u64 {
        self.lock().attempt
    }

    /// Write `status` only if `attempt` is still the latest one. Returns whether it was written.
    pub fn set_if_current(&self, attempt: u64, status: Status) -> bool {
        let mut state = self.lock();
        if state.attempt != attempt {
            return false;
        }
        state.status = status;
        true
    }
}
