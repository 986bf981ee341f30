use thiserror::Error;

/// Misuse of a [`Timer`](crate::Timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer queried before start()")]
    Uninitialized,
}

/// Worker lifecycle misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("worker '{0}' is already started")]
    AlreadyStarted(String),

    #[error("worker '{0}' is not running")]
    NotRunning(String),

    #[error("failed to spawn worker '{name}': {reason}")]
    Spawn { name: String, reason: String },
}

/// Failure of the external process-variable read/write capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PvError {
    #[error("unknown process variable '{0}'")]
    Unknown(String),

    #[error("process variable '{0}' is unreachable")]
    Unreachable(String),

    #[error("timed out accessing process variable '{0}'")]
    Timeout(String),

    #[error("type mismatch on '{pv}': expected {expected}")]
    TypeMismatch { pv: String, expected: &'static str },
}

/// Error produced by a single work step or completion check.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkError {
    #[error(transparent)]
    Pv(#[from] PvError),

    #[error("{0}")]
    Failed(String),

    #[error("work step panicked: {0}")]
    Panicked(String),
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
