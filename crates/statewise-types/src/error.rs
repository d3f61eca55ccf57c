use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known error codes raised by the engine itself.
///
/// Task runners may raise any other string; these are the ones the
/// interpreter produces or treats specially.
pub mod codes {
    /// Wildcard accepted in `ErrorEquals`.
    pub const ALL: &str = "States.ALL";
    /// Generic failure with no more specific code.
    pub const ERROR: &str = "States.Error";
    /// Raised by a Fail state that does not name its own error.
    pub const FAIL: &str = "States.Fail";
    /// Unresolvable reference or invalid runtime value.
    pub const RUNTIME: &str = "States.Runtime";
    pub const TASK_FAILED: &str = "States.TaskFailed";
    pub const TIMEOUT: &str = "States.Timeout";
    pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
    pub const EXCEED_TOLERATED_FAILURE_THRESHOLD: &str = "States.ExceedToleratedFailureThreshold";
    pub const RESULT_PATH_MATCH_FAILURE: &str = "States.ResultPathMatchFailure";
    pub const INTRINSIC_FAILURE: &str = "States.IntrinsicFailure";
    pub const ITEM_READER_FAILED: &str = "States.ItemReaderFailed";
}

/// Errors detected while loading a workflow definition.
///
/// Any of these aborts loading: no partially usable workflow is produced.
/// Messages name the offending location as a dotted scope such as
/// `States.FirstState` or `States.MapState.ItemBatcher`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("invalid workflow definition: {0}")]
    Parse(String),

    #[error("{scope} does not have required field \"{field}\"")]
    MissingField { scope: String, field: String },

    #[error("{scope} field \"{field}\" value \"{value}\" {reason}")]
    InvalidField {
        scope: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("{scope} {message}")]
    Invalid { scope: String, message: String },

    #[error("Invalid state type: [{0}]")]
    UnknownStateType(String),

    #[error("Invalid path [{path}]: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid Reference Path [{0}]")]
    InvalidReferencePath(String),

    #[error("Invalid intrinsic function [{expression}]: {reason}")]
    InvalidIntrinsic { expression: String, reason: String },
}

/// A catchable runtime failure.
///
/// Carries an ASL error code (`Error`) and an optional human-readable
/// `Cause`. This is the shape offered to Retry/Catch and, when unrecovered,
/// written as the failing state's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Cause", default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.error, cause),
            None => f.write_str(&self.error),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    pub fn new(error: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            error: error.into(),
            cause,
        }
    }

    /// A `States.Runtime` error with the given cause.
    pub fn runtime(cause: impl Into<String>) -> Self {
        Self::new(codes::RUNTIME, Some(cause.into()))
    }

    /// Raised when a required path does not resolve.
    pub fn no_such_variable(path: &str) -> Self {
        Self::runtime(format!("No such variable [{path}]"))
    }

    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(codes::TASK_FAILED, Some(cause.into()))
    }

    pub fn intrinsic(cause: impl Into<String>) -> Self {
        Self::new(codes::INTRINSIC_FAILURE, Some(cause.into()))
    }

    /// Render as the `{"Error": .., "Cause": ..}` output object.
    pub fn to_output(&self) -> Value {
        let mut out = Map::new();
        out.insert("Error".to_string(), Value::String(self.error.clone()));
        if let Some(cause) = &self.cause {
            out.insert("Cause".to_string(), Value::String(cause.clone()));
        }
        Value::Object(out)
    }

    /// Recover an error from a failed state's output object.
    ///
    /// Returns `None` when the value carries no `Error` string.
    pub fn from_output(output: &Value) -> Option<Self> {
        let error = output.get("Error")?.as_str()?.to_string();
        let cause = output
            .get("Cause")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self { error, cause })
    }
}

/// Errors from repository operations (used by trait definitions in statewise-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
