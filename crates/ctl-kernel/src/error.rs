use ctl_bt::BtError;
use thiserror::Error;

use crate::manager::TreeId;

/// Problems found in a tree descriptor. Raised before any worker is started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("node names must not be empty")]
    EmptyName,

    #[error("duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("composite '{0}' has no children")]
    NoChildren(String),

    #[error("node '{0}' must name a process variable")]
    EmptyPv(String),

    #[error("node '{node}': {field} must be positive")]
    NonPositive { node: String, field: &'static str },

    #[error("node '{0}': increment must be numeric")]
    NonNumericIncrement(String),

    #[error("acknowledge node '{0}' permits nobody")]
    NoPermittedIdentities(String),
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("unknown tree {0}")]
    UnknownTree(TreeId),

    #[error("tree {0} is already being driven")]
    AlreadyRunning(TreeId),

    #[error("tree {0} is not being driven")]
    NotRunning(TreeId),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Bt(#[from] BtError),

    #[error("failed to read tree: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
