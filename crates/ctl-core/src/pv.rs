//! Process-variable access.
//!
//! Device transport is external: conditions and action steps only see the [`PvClient`]
//! capability. [`InMemoryPvStore`] is the in-process implementation used for simulation and
//! tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::PvError;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum PvValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PvValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Int(v) => Some(*v as f64),
            PvValue::Float(v) => Some(*v),
            PvValue::Bool(_) | PvValue::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Numeric sum; integer when both sides are integers.
    pub fn checked_add(&self, other: &PvValue) -> Option<PvValue> {
        match (self, other) {
            (PvValue::Int(a), PvValue::Int(b)) => a.checked_add(*b).map(PvValue::Int),
            _ => Some(PvValue::Float(self.as_f64()? + other.as_f64()?)),
        }
    }

    fn compare(&self, other: &PvValue) -> Option<Ordering> {
        match (self, other) {
            (PvValue::Bool(a), PvValue::Bool(b)) => Some(a.cmp(b)),
            (PvValue::Text(a), PvValue::Text(b)) => Some(a.cmp(b)),
            (PvValue::Int(a), PvValue::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Bool(v) => write!(f, "{v}"),
            PvValue::Int(v) => write!(f, "{v}"),
            PvValue::Float(v) => write!(f, "{v}"),
            PvValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for PvValue {
    fn from(value: bool) -> Self {
        PvValue::Bool(value)
    }
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        PvValue::Int(value)
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        PvValue::Float(value)
    }
}

impl From<&str> for PvValue {
    fn from(value: &str) -> Self {
        PvValue::Text(value.to_string())
    }
}

/// Comparison applied as `actual <op> target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Comparator {
    #[cfg_attr(feature = "serde", serde(alias = "equal", alias = "=="))]
    Eq,
    #[cfg_attr(feature = "serde", serde(alias = "not_equal", alias = "!="))]
    Ne,
    #[cfg_attr(feature = "serde", serde(alias = "less", alias = "<"))]
    Lt,
    #[cfg_attr(feature = "serde", serde(alias = "greater", alias = ">"))]
    Gt,
    #[cfg_attr(feature = "serde", serde(alias = "less_equal", alias = "<="))]
    Le,
    #[cfg_attr(feature = "serde", serde(alias = "greater_equal", alias = ">="))]
    Ge,
}

impl Comparator {
    /// Incomparable values (e.g. text against a number) only satisfy `Ne`.
    pub fn evaluate(self, actual: &PvValue, target: &PvValue) -> bool {
        let Some(ordering) = actual.compare(target) else {
            return self == Comparator::Ne;
        };
        match self {
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Le => ordering != Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Ge => ">=",
        }
    }
}

/// Read/write capability over named process variables. Calls may fail or time out.
pub trait PvClient: Send + Sync {
    fn read(&self, pv: &str) -> Result<PvValue, PvError>;

    fn write(&self, pv: &str, value: PvValue) -> Result<(), PvError>;
}

#[derive(Debug, Default)]
struct StoreState {
    values: BTreeMap<String, PvValue>,
    unreachable: BTreeSet<String>,
}

/// Thread-safe in-memory PV table. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPvStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryPvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<PvValue>,
    {
        let store = Self::new();
        for (name, value) in values {
            store.insert(name, value);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, pv: impl Into<String>, value: impl Into<PvValue>) {
        self.lock().values.insert(pv.into(), value.into());
    }

    pub fn get(&self, pv: &str) -> Option<PvValue> {
        self.lock().values.get(pv).cloned()
    }

    /// Simulate a device that stops answering.
    pub fn set_unreachable(&self, pv: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(pv.to_string());
        } else {
            state.unreachable.remove(pv);
        }
    }
}

impl PvClient for InMemoryPvStore {
    fn read(&self, pv: &str) -> Result<PvValue, PvError> {
        let state = self.lock();
        if state.unreachable.contains(pv) {
            return Err(PvError::Unreachable(pv.to_string()));
        }
        state
            .values
            .get(pv)
            .cloned()
            .ok_or_else(|| PvError::Unknown(pv.to_string()))
    }

    fn write(&self, pv: &str, value: PvValue) -> Result<(), PvError> {
        let mut state = self.lock();
        if state.unreachable.contains(pv) {
            return Err(PvError::Unreachable(pv.to_string()));
        }
        state.values.insert(pv.to_string(), value);
        Ok(())
    }
}
