//! Execution context: the single mutable, persisted record of a workflow run.
//!
//! A `Context` is the whole checkpoint. It has typed fields for the parts the
//! interpreter relies on (`Execution`, the current `State`, `StateHistory`)
//! and keeps per-state scratch data (retry counters, wait deadlines, child
//! contexts) in a flattened JSON side-table on [`StateRecord`], so the
//! serialized form stays the plain nested `{"Execution": .., "State": ..}`
//! document other tools expect.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Status of an execution, derived purely from its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// The `Execution` namespace of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(rename = "Id", default = "uuid::Uuid::now_v7")]
    pub id: Uuid,
    #[serde(rename = "Input", default)]
    pub input: Value,
    #[serde(rename = "StartTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set exactly once, when the execution reaches a state with no next state.
    #[serde(rename = "EndTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Default for ExecutionRecord {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7(),
            input: Value::Object(Map::new()),
            start_time: None,
            end_time: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StateRecord
// ---------------------------------------------------------------------------

/// The `State` namespace: the currently active state, or a history entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Guid", default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    #[serde(rename = "Input", default)]
    pub input: Value,
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(rename = "EnteredTime", default, skip_serializing_if = "Option::is_none")]
    pub entered_time: Option<DateTime<Utc>>,
    #[serde(rename = "FinishedTime", default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<DateTime<Utc>>,
    /// Seconds between entry and finish.
    #[serde(rename = "Duration", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(rename = "NextState", default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "Cause", default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// State-type specific data (retry counters, deadlines, child contexts).
    #[serde(flatten)]
    pub scratch: Map<String, Value>,
}

impl StateRecord {
    /// A fresh record for entering `name` with `input`.
    pub fn named(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: Some(name.into()),
            input,
            ..Self::default()
        }
    }

    pub fn scratch(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    pub fn set_scratch(&mut self, key: &str, value: Value) {
        self.scratch.insert(key.to_string(), value);
    }

    pub fn take_scratch(&mut self, key: &str) -> Option<Value> {
        self.scratch.remove(key)
    }

    /// Read an RFC 3339 timestamp stored in scratch data.
    pub fn scratch_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.scratch.get(key)?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn set_scratch_time(&mut self, key: &str, time: DateTime<Utc>) {
        self.set_scratch(key, Value::String(time.to_rfc3339()));
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Mutable, JSON-serializable execution record for one (root or child) execution.
///
/// Mutated only by the owning state's enter/finish pair and the state's own
/// scratch bookkeeping. Not internally synchronized: advance a context from
/// one call path at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "Execution", default)]
    pub execution: ExecutionRecord,
    #[serde(rename = "State", default)]
    pub state: StateRecord,
    #[serde(rename = "StateHistory", default)]
    pub state_history: Vec<StateRecord>,
    #[serde(rename = "StateMachine", default)]
    pub state_machine: Map<String, Value>,
    #[serde(rename = "Task", default)]
    pub task: Map<String, Value>,
}

impl Context {
    /// Create a root context for a new execution.
    pub fn new(input: Value) -> Self {
        Self {
            execution: ExecutionRecord {
                input,
                ..ExecutionRecord::default()
            },
            ..Self::default()
        }
    }

    /// Create a child context (Map item or Parallel branch) sharing the
    /// parent's execution id.
    pub fn child(execution_id: Uuid, input: Value) -> Self {
        Self {
            execution: ExecutionRecord {
                id: execution_id,
                input,
                start_time: None,
                end_time: None,
            },
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn started(&self) -> bool {
        self.execution.start_time.is_some()
    }

    pub fn running(&self) -> bool {
        self.started() && !self.ended()
    }

    pub fn ended(&self) -> bool {
        self.execution.end_time.is_some()
    }

    /// Ended with an unrecovered error.
    pub fn failed(&self) -> bool {
        self.ended() && self.state.error.is_some()
    }

    pub fn status(&self) -> ExecutionStatus {
        if !self.started() {
            ExecutionStatus::Pending
        } else if self.running() {
            ExecutionStatus::Running
        } else if self.state.error.is_some() {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::Success
        }
    }

    pub fn state_started(&self) -> bool {
        self.state.entered_time.is_some()
    }

    pub fn state_finished(&self) -> bool {
        self.state.finished_time.is_some()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state_name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    pub fn input(&self) -> &Value {
        &self.state.input
    }

    pub fn output(&self) -> Option<&Value> {
        self.state.output.as_ref()
    }

    pub fn next_state(&self) -> Option<&str> {
        self.state.next_state.as_deref()
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Record entry into the current state.
    pub fn enter_state(&mut self, now: DateTime<Utc>) {
        self.execution.start_time.get_or_insert(now);
        self.state.guid = Some(Uuid::now_v7());
        self.state.entered_time = Some(now);
    }

    /// Record completion of the current state.
    ///
    /// Appends the finished record to `StateHistory`, then either moves to
    /// `NextState` (seeding its input with this state's output) or, when
    /// there is no next state, ends the execution.
    pub fn finish_state(&mut self, now: DateTime<Utc>) {
        let finished = *self.state.finished_time.get_or_insert(now);
        if let Some(entered) = self.state.entered_time {
            self.state.duration = Some((finished - entered).num_milliseconds() as f64 / 1000.0);
        }

        let next = self.state.next_state.clone();
        if next.is_none() && self.execution.end_time.is_none() {
            self.execution.end_time = Some(now);
        }

        self.state_history.push(self.state.clone());

        if let Some(next) = next {
            let input = self.state.output.clone().unwrap_or(Value::Null);
            self.state = StateRecord::named(next, input);
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize the entire context to JSON for checkpointing and `$$` paths.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }

    /// Restore a context from a JSON checkpoint.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// Listing row for a persisted execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Context> for ExecutionSummary {
    fn from(ctx: &Context) -> Self {
        Self {
            id: ctx.execution.id,
            status: ctx.status(),
            state_name: ctx.state.name.clone(),
            start_time: ctx.execution.start_time,
            end_time: ctx.execution.end_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entered(name: &str) -> Context {
        let mut ctx = Context::new(json!({"foo": 1}));
        ctx.state = StateRecord::named(name, json!({"foo": 1}));
        ctx
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    #[test]
    fn test_new_context_is_pending() {
        let ctx = Context::new(json!({}));
        assert!(!ctx.started());
        assert!(!ctx.ended());
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
        assert!(ctx.state_history.is_empty());
    }

    #[test]
    fn test_enter_state_starts_execution() {
        let mut ctx = entered("First");
        let now = Utc::now();
        ctx.enter_state(now);

        assert_eq!(ctx.execution.start_time, Some(now));
        assert_eq!(ctx.state.entered_time, Some(now));
        assert!(ctx.state.guid.is_some());
        assert_eq!(ctx.status(), ExecutionStatus::Running);
    }

    #[test]
    fn test_enter_state_keeps_original_start_time() {
        let mut ctx = entered("First");
        let first = Utc::now();
        ctx.enter_state(first);
        ctx.enter_state(first + Duration::seconds(5));
        assert_eq!(ctx.execution.start_time, Some(first));
    }

    #[test]
    fn test_status_failure_requires_end() {
        let mut ctx = entered("Boom");
        let now = Utc::now();
        ctx.enter_state(now);
        ctx.state.error = Some("States.TaskFailed".to_string());
        assert_eq!(ctx.status(), ExecutionStatus::Running);
        assert!(!ctx.failed());

        ctx.finish_state(now);
        assert_eq!(ctx.status(), ExecutionStatus::Failure);
        assert!(ctx.failed());
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    #[test]
    fn test_finish_state_moves_to_next() {
        let mut ctx = entered("First");
        let start = Utc::now();
        ctx.enter_state(start);
        ctx.state.output = Some(json!({"bar": 2}));
        ctx.state.next_state = Some("Second".to_string());
        ctx.finish_state(start + Duration::milliseconds(1500));

        assert_eq!(ctx.state_history.len(), 1);
        assert_eq!(ctx.state_history[0].duration, Some(1.5));
        assert_eq!(ctx.state_name(), Some("Second"));
        assert_eq!(ctx.input(), &json!({"bar": 2}));
        assert!(!ctx.state_started());
        assert!(!ctx.ended());
    }

    #[test]
    fn test_finish_terminal_state_ends_execution() {
        let mut ctx = entered("Last");
        let now = Utc::now();
        ctx.enter_state(now);
        ctx.state.output = Some(json!("done"));
        ctx.finish_state(now);

        assert!(ctx.ended());
        assert_eq!(ctx.status(), ExecutionStatus::Success);
        assert_eq!(ctx.state_name(), Some("Last"));
        assert!(ctx.state_finished());
        assert_eq!(ctx.output(), Some(&json!("done")));
    }

    // -----------------------------------------------------------------------
    // Scratch data
    // -----------------------------------------------------------------------

    #[test]
    fn test_scratch_time_roundtrip() {
        let mut record = StateRecord::default();
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        record.set_scratch_time("WaitUntil", t);
        assert_eq!(record.scratch_time("WaitUntil"), Some(t));
        assert!(record.take_scratch("WaitUntil").is_some());
        assert_eq!(record.scratch_time("WaitUntil"), None);
    }

    // -----------------------------------------------------------------------
    // JSON checkpoint roundtrip
    // -----------------------------------------------------------------------

    #[test]
    fn test_serialized_layout_uses_asl_names() {
        let mut ctx = entered("First");
        ctx.state.set_scratch("RetryCount", json!(2));
        let value = ctx.to_value();

        assert_eq!(value["Execution"]["Input"], json!({"foo": 1}));
        assert_eq!(value["State"]["Name"], json!("First"));
        assert_eq!(value["State"]["RetryCount"], json!(2));
        assert_eq!(value["StateHistory"], json!([]));
        assert!(value["Execution"].get("EndTime").is_none());
    }

    #[test]
    fn test_json_checkpoint_roundtrip() {
        let mut ctx = entered("First");
        let now = Utc::now();
        ctx.enter_state(now);
        ctx.state.set_scratch("ItemProcessorContext", json!([{"State": {}}]));

        let restored = Context::from_value(ctx.to_value()).unwrap();
        assert_eq!(restored.execution.id, ctx.execution.id);
        assert_eq!(restored.state.name, ctx.state.name);
        assert_eq!(
            restored.state.scratch("ItemProcessorContext"),
            Some(&json!([{"State": {}}]))
        );
    }

    #[test]
    fn test_from_partial_json_fills_defaults() {
        let ctx = Context::from_json(r#"{"Execution": {"Input": {"a": 1}}}"#).unwrap();
        assert_eq!(ctx.execution.input, json!({"a": 1}));
        assert!(ctx.state.name.is_none());
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
    }

    #[test]
    fn test_summary_from_context() {
        let ctx = entered("First");
        let summary = ExecutionSummary::from(&ctx);
        assert_eq!(summary.id, ctx.execution.id);
        assert_eq!(summary.status, ExecutionStatus::Pending);
        assert_eq!(summary.state_name.as_deref(), Some("First"));
    }
}
