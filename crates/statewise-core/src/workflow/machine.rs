//! A parsed state graph: `StartAt` plus its named states.
//!
//! Both the root workflow and every Map `ItemProcessor` / Parallel branch are
//! a [`StateMachine`]. Transitions are validated within one machine only, so a
//! branch cannot jump into its parent or a sibling.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use statewise_types::context::{Context, StateRecord};
use statewise_types::error::DefinitionError;

use super::definition::{Fields, WorkflowError};
use super::states::{EdgeKind, State, Step, Tick};
use crate::runner::RunnerRegistry;

/// Upper bound on states finished by one `run_nonblocking` call, so a
/// definition that loops through instant states still yields to the caller.
const MAX_STEPS_PER_RUN: usize = 1_000;

#[derive(Debug)]
pub struct StateMachine {
    start_at: String,
    comment: Option<String>,
    states: BTreeMap<String, State>,
}

impl StateMachine {
    /// Parse and validate a machine definition.
    ///
    /// `scope` names the machine itself in errors (`Workflow`,
    /// `States.MapState.ItemProcessor`); states are always scoped
    /// `States.<name>`.
    pub fn parse(scope: &str, definition: &Value, registry: &RunnerRegistry) -> Result<Self, DefinitionError> {
        let fields = Fields::new(scope, definition)?;
        let start_at = fields.required_str("StartAt")?.to_string();
        let raw_states = match fields.get("States") {
            Some(Value::Object(map)) => map,
            Some(other) => return Err(fields.invalid("States", other, "must be an object")),
            None => return Err(fields.missing("States")),
        };
        if raw_states.is_empty() {
            return Err(fields.error("field \"States\" must not be empty"));
        }

        let mut states = BTreeMap::new();
        for (name, payload) in raw_states {
            let state = State::parse(name, format!("States.{name}"), payload, registry)?;
            states.insert(name.clone(), state);
        }

        if !states.contains_key(&start_at) {
            return Err(fields.invalid(
                "StartAt",
                &Value::String(start_at),
                "is not found in \"States\"",
            ));
        }
        for (name, state) in &states {
            for edge in state.edges() {
                if !states.contains_key(&edge.target) {
                    let field = match edge.kind {
                        EdgeKind::Default => "Default",
                        _ => "Next",
                    };
                    return Err(DefinitionError::InvalidField {
                        scope: format!("States.{name}"),
                        field: field.to_string(),
                        value: edge.target,
                        reason: "is not found in \"States\"".to_string(),
                    });
                }
            }
        }

        Ok(Self {
            start_at,
            comment: fields.str("Comment")?.map(str::to_string),
            states,
        })
    }

    pub fn start_at(&self) -> &str {
        &self.start_at
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// States ordered by name.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Position a fresh context on `StartAt` with the execution input.
    ///
    /// Contexts that already name a state are left untouched.
    pub fn prepare(&self, ctx: &mut Context) {
        if ctx.state.name.is_none() {
            ctx.state = StateRecord::named(self.start_at.clone(), ctx.execution.input.clone());
        }
    }

    pub fn current_state(&self, ctx: &Context) -> Result<&State, WorkflowError> {
        let name = ctx
            .state_name()
            .ok_or_else(|| WorkflowError::InvalidContext("context has no current state".to_string()))?;
        self.states
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownState(name.to_string()))
    }

    /// One non-blocking step of the current state.
    pub fn advance(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Step, WorkflowError> {
        self.prepare(ctx);
        if ctx.ended() {
            return Ok(Step::Done);
        }
        Ok(self.current_state(ctx)?.advance(ctx, tick))
    }

    /// Advance through every state that can finish right now.
    ///
    /// Returns [`Step::Done`] once the execution has ended, otherwise the
    /// step of the state that could not finish.
    pub fn run_nonblocking(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Step, WorkflowError> {
        for _ in 0..MAX_STEPS_PER_RUN {
            match self.advance(ctx, tick)? {
                Step::Done if ctx.ended() => return Ok(Step::Done),
                Step::Done => continue,
                blocked => return Ok(blocked),
            }
        }
        tracing::debug!(
            execution_id = %ctx.execution.id,
            state = ctx.state_name().unwrap_or_default(),
            "step limit reached, yielding"
        );
        Ok(Step::Pending)
    }

    /// Clean up runner work held by an execution that will not be advanced
    /// again.
    pub fn release(&self, ctx: &mut Context) {
        if ctx.ended() {
            return;
        }
        if let Ok(state) = self.current_state(ctx) {
            state.release(ctx);
        }
    }

    /// Earliest time the current state is known to be blocked until.
    pub fn wait_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        if ctx.ended() {
            return None;
        }
        self.current_state(ctx).ok()?.wait_until(ctx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;

    use super::StateMachine;
    use crate::runner::RunnerRegistry;

    pub fn machine(definition: Value) -> StateMachine {
        machine_with(definition, &RunnerRegistry::new())
    }

    pub fn machine_with(definition: Value, registry: &RunnerRegistry) -> StateMachine {
        StateMachine::parse("Workflow", &definition, registry).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::machine;
    use super::*;
    use serde_json::json;
    use statewise_types::credentials::Credentials;

    fn parse(definition: Value) -> Result<StateMachine, DefinitionError> {
        StateMachine::parse("Workflow", &definition, &RunnerRegistry::new())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_requires_start_at_and_states() {
        let err = parse(json!({"States": {}})).unwrap_err();
        assert_eq!(err.to_string(), "Workflow does not have required field \"StartAt\"");
        let err = parse(json!({"StartAt": "A"})).unwrap_err();
        assert_eq!(err.to_string(), "Workflow does not have required field \"States\"");
    }

    #[test]
    fn test_start_at_must_exist() {
        let err = parse(json!({"StartAt": "Nope", "States": {"A": {"Type": "Succeed"}}})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Workflow field \"StartAt\" value \"Nope\" is not found in \"States\""
        );
    }

    #[test]
    fn test_dangling_next_is_rejected() {
        let err = parse(json!({
            "StartAt": "Add",
            "States": {"Add": {"Type": "Pass", "Next": "PassState"}}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.Add field \"Next\" value \"PassState\" is not found in \"States\""
        );
    }

    #[test]
    fn test_dangling_catch_and_default_are_rejected() {
        let err = parse(json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [{"Variable": "$.a", "IsNull": true, "Next": "Done"}], "Default": "Gone"},
                "Done": {"Type": "Succeed"}
            }
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.C field \"Default\" value \"Gone\" is not found in \"States\""
        );
    }

    #[test]
    fn test_unknown_state_type() {
        let err = parse(json!({"StartAt": "A", "States": {"A": {"Type": "Teleport"}}})).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state type: [Teleport]");
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    #[test]
    fn test_prepare_seeds_start_state() {
        let m = machine(json!({"StartAt": "A", "States": {"A": {"Type": "Succeed"}}}));
        let mut ctx = Context::new(json!({"x": 1}));
        m.prepare(&mut ctx);
        assert_eq!(ctx.state_name(), Some("A"));
        assert_eq!(ctx.input(), &json!({"x": 1}));

        ctx.state.name = Some("Elsewhere".to_string());
        m.prepare(&mut ctx);
        assert_eq!(ctx.state_name(), Some("Elsewhere"));
        assert!(matches!(m.current_state(&ctx), Err(WorkflowError::UnknownState(_))));
    }

    #[test]
    fn test_run_nonblocking_runs_to_end() {
        let m = machine(json!({
            "StartAt": "A",
            "States": {
                "A": {"Type": "Pass", "Result": {"a": 1}, "Next": "B"},
                "B": {"Type": "Pass", "Parameters": {"b.$": "$.a"}, "ResultPath": "$.c", "End": true}
            }
        }));
        let mut ctx = Context::new(json!({}));
        let credentials = Credentials::new();
        let tick = Tick { now: Utc::now(), credentials: &credentials };

        assert_eq!(m.run_nonblocking(&mut ctx, &tick).unwrap(), Step::Done);
        assert!(ctx.ended());
        assert_eq!(ctx.state_history.len(), 2);
        assert_eq!(ctx.output(), Some(&json!({"a": 1, "c": {"b": 1}})));

        // Finished executions are left alone.
        assert_eq!(m.advance(&mut ctx, &tick).unwrap(), Step::Done);
        assert_eq!(ctx.state_history.len(), 2);
    }

    #[test]
    fn test_run_nonblocking_stops_at_wait() {
        let m = machine(json!({
            "StartAt": "W",
            "States": {
                "W": {"Type": "Wait", "Seconds": 30, "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }));
        let mut ctx = Context::new(json!({}));
        let credentials = Credentials::new();
        let now = Utc::now();
        let tick = Tick { now, credentials: &credentials };

        let step = m.run_nonblocking(&mut ctx, &tick).unwrap();
        let until = now + chrono::TimeDelta::seconds(30);
        assert_eq!(step, Step::BlockedUntil(until));
        assert_eq!(m.wait_until(&ctx), Some(until));
    }
}
