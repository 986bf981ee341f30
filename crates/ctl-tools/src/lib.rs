//! Tooling primitives for the control-tree runtime.
//!
//! Workers never log into ambient global state: each one holds a [`TraceHandle`] cloned from a
//! [`TraceCollector`] owned by whoever drives the tree.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod trace;

pub use trace::{
    NullTraceSink, TraceCollector, TraceEvent, TraceHandle, TraceLog, TraceSink, VecTraceSink,
};
