//! Error taxonomy shared by every store and the autonomy loop.
//!
//! Each variant maps onto a stable [`ErrorKind`]. Callers branch on the kind:
//! `NotFound`, `Conflict` and `Invalid` are ordinary control flow for an agent
//! (a lost claim race means "try another task"), while `Storage` and
//! `External` carry the operation and target needed to retry or abort.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Timeout,
    Storage,
    External,
    Invalid,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
            Self::External => "external",
            Self::Invalid => "invalid",
        }
    }

    /// True for conditions an agent treats as normal control flow.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::NotFound | Self::Conflict | Self::Invalid)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("task {0} not found")]
    TaskNotFound(u64),

    #[error("unknown worktree '{0}'")]
    UnknownWorktree(String),

    #[error("protocol request '{0}' not found")]
    RequestNotFound(String),

    #[error("agent '{0}' is not a team member")]
    AgentNotFound(String),

    #[error("task {id} cannot be claimed: {reason}")]
    ClaimConflict { id: u64, reason: String },

    #[error("protocol request '{id}' already {status}")]
    DuplicateResponse { id: String, status: String },

    #[error("{initiator} already has a pending {kind} request '{id}'")]
    RequestInFlight {
        initiator: String,
        kind: String,
        id: String,
    },

    #[error("worktree '{0}' already exists")]
    NameConflict(String),

    #[error("task {task_id} is already bound to worktree '{worktree}'")]
    BindingConflict { task_id: u64, worktree: String },

    #[error("worktree '{name}' is {status}, expected active")]
    WorktreeClosed { name: String, status: String },

    #[error("lock busy after {attempts} attempts: {path}")]
    LockBusy { path: PathBuf, attempts: u32 },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("{op} {path}: {source}")]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} failed: {message}")]
    External { operation: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_)
            | Self::UnknownWorktree(_)
            | Self::RequestNotFound(_)
            | Self::AgentNotFound(_) => ErrorKind::NotFound,
            Self::ClaimConflict { .. }
            | Self::DuplicateResponse { .. }
            | Self::RequestInFlight { .. }
            | Self::NameConflict(_)
            | Self::BindingConflict { .. }
            | Self::WorktreeClosed { .. }
            | Self::LockBusy { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Storage { .. } | Self::Json { .. } => ErrorKind::Storage,
            Self::External { .. } => ErrorKind::External,
            Self::Invalid(_) => ErrorKind::Invalid,
        }
    }

    pub fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
