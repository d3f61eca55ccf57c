//! Wire types shared between the interpreter and task runners.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque reference to a unit of work started by a runner.
///
/// Persisted in the owning state's scratch data so that a resumed process
/// can keep polling the same work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerHandle {
    /// Runner-assigned identifier.
    pub id: String,
    /// Name of the runner that owns the work (e.g. "docker").
    pub runner: String,
    /// Runner-specific bookkeeping.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Result of a non-blocking poll.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerPoll {
    Running,
    Succeeded(Value),
    Failed {
        error: String,
        cause: Option<String>,
    },
}

/// Errors raised by a runner itself (as opposed to the work failing).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no runner registered for resource \"{0}\"")]
    UnknownResource(String),

    #[error("failed to start \"{resource}\": {reason}")]
    StartFailed { resource: String, reason: String },

    #[error("runner does not know handle {0}")]
    UnknownHandle(String),

    #[error("runner I/O error: {0}")]
    Io(#[from] std::io::Error),
}
