//! Shared primitives for the control-tree runtime.
//!
//! The tick thread and the action workers only ever share two things: a [`StatusCell`]
//! (worker -> tick thread) and a [`WorkGate`] (tick thread -> worker). Everything else a
//! worker touches is private to it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod error;
pub mod gate;
pub mod pv;
pub mod status;
pub mod timer;
pub mod worker;

pub use error::{PvError, TimerError, WorkError, WorkerError};
pub use gate::WorkGate;
pub use pv::{Comparator, InMemoryPvStore, PvClient, PvValue};
pub use status::{Status, StatusCell};
pub use timer::Timer;
pub use worker::{KeepWorking, Worker, WorkerBody};
