//! The per-step state machines and their shared non-blocking driver.
//!
//! Every state type implements the same contract: `start` runs once when the
//! state is entered (and again for each retry), `poll` reports progress
//! without blocking. [`State::advance`] wraps both with entry/finish
//! bookkeeping and Retry/Catch recovery, and is safe to call repeatedly.

mod choice;
mod fail;
mod map;
mod parallel;
mod pass;
mod succeed;
mod task;
mod wait;

pub use choice::Choice;
pub use fail::Fail;
pub use map::Map;
pub use parallel::Parallel;
pub use pass::Pass;
pub use succeed::Succeed;
pub use task::Task;
pub use wait::Wait;

use chrono::{DateTime, Utc};
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::credentials::Credentials;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::definition::{Fields, Transition};
use super::retry::{Recovery, RetryCatch, RETRY_AT_KEY};
use crate::runner::RunnerRegistry;

// ---------------------------------------------------------------------------
// Step contract
// ---------------------------------------------------------------------------

/// Result of one non-blocking `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The current state finished (or the execution had already ended).
    Done,
    /// Still running; poll again later.
    Pending,
    /// Nothing can happen before this time.
    BlockedUntil(DateTime<Utc>),
}

/// Inputs of one `advance` call.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub now: DateTime<Utc>,
    pub credentials: &'a Credentials,
}

/// What a state reports from `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Running,
    BlockedUntil(DateTime<Utc>),
    /// Output and `NextState` are set; the state can finish.
    Complete,
}

/// Behavior shared by every state type.
pub(crate) trait Behavior {
    fn start(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<(), ExecutionError>;

    fn poll(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Progress, ExecutionError>;

    fn retry_catch(&self) -> Option<&RetryCatch> {
        None
    }

    /// Deadline the running state is waiting on, if it knows one.
    fn blocked_until(&self, _ctx: &Context) -> Option<DateTime<Utc>> {
        None
    }

    /// Give back runner work held by an unfinished state.
    fn release(&self, _ctx: &mut Context) {}
}

/// Finish a successful state: record its output and transition.
pub(crate) fn complete(ctx: &mut Context, output: Value, transition: &Transition) -> Progress {
    ctx.state.output = Some(output);
    ctx.state.next_state = transition.next().map(str::to_string);
    Progress::Complete
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Next,
    Choice,
    Default,
    Catch,
}

/// A possible transition out of a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: String,
    pub kind: EdgeKind,
    pub label: Option<String>,
}

impl Edge {
    fn next(target: &str) -> Self {
        Self {
            target: target.to_string(),
            kind: EdgeKind::Next,
            label: None,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StateKind {
    Pass(Pass),
    Task(Task),
    Choice(Choice),
    Wait(Wait),
    Succeed(Succeed),
    Fail(Fail),
    Map(Map),
    Parallel(Parallel),
}

#[derive(Debug)]
pub struct State {
    pub name: String,
    pub comment: Option<String>,
    pub kind: StateKind,
}

impl State {
    /// Build a state from its definition, dispatching on `Type`.
    ///
    /// `scope` is the dotted location of the state (`States.MyState`).
    pub fn parse(
        name: &str,
        scope: String,
        payload: &Value,
        registry: &RunnerRegistry,
    ) -> Result<Self, DefinitionError> {
        let fields = Fields::new(scope, payload)?;
        let state_type = fields.required_str("Type")?;
        let kind = match state_type {
            "Pass" => StateKind::Pass(Pass::parse(&fields)?),
            "Task" => StateKind::Task(Task::parse(&fields, registry)?),
            "Choice" => StateKind::Choice(Choice::parse(&fields)?),
            "Wait" => StateKind::Wait(Wait::parse(&fields)?),
            "Succeed" => StateKind::Succeed(Succeed::parse(&fields)?),
            "Fail" => StateKind::Fail(Fail::parse(&fields)?),
            "Map" => StateKind::Map(Map::parse(&fields, registry)?),
            "Parallel" => StateKind::Parallel(Parallel::parse(&fields, registry)?),
            other => return Err(DefinitionError::UnknownStateType(other.to_string())),
        };
        Ok(Self {
            name: name.to_string(),
            comment: fields.str("Comment")?.map(str::to_string),
            kind,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            StateKind::Pass(_) => "Pass",
            StateKind::Task(_) => "Task",
            StateKind::Choice(_) => "Choice",
            StateKind::Wait(_) => "Wait",
            StateKind::Succeed(_) => "Succeed",
            StateKind::Fail(_) => "Fail",
            StateKind::Map(_) => "Map",
            StateKind::Parallel(_) => "Parallel",
        }
    }

    fn behavior(&self) -> &dyn Behavior {
        match &self.kind {
            StateKind::Pass(s) => s,
            StateKind::Task(s) => s,
            StateKind::Choice(s) => s,
            StateKind::Wait(s) => s,
            StateKind::Succeed(s) => s,
            StateKind::Fail(s) => s,
            StateKind::Map(s) => s,
            StateKind::Parallel(s) => s,
        }
    }

    fn transition(&self) -> Option<&Transition> {
        match &self.kind {
            StateKind::Pass(s) => Some(&s.transition),
            StateKind::Task(s) => Some(&s.transition),
            StateKind::Wait(s) => Some(&s.transition),
            StateKind::Map(s) => Some(&s.transition),
            StateKind::Parallel(s) => Some(&s.transition),
            StateKind::Choice(_) | StateKind::Succeed(_) | StateKind::Fail(_) => None,
        }
    }

    /// Whether reaching this state's finish can end the execution.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            StateKind::Succeed(_) | StateKind::Fail(_) => true,
            StateKind::Choice(_) => false,
            _ => self.transition() == Some(&Transition::End),
        }
    }

    /// Every transition this state can take.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        if let Some(next) = self.transition().and_then(Transition::next) {
            edges.push(Edge::next(next));
        }
        if let StateKind::Choice(choice) = &self.kind {
            edges.extend(choice.edges());
        }
        if let Some(rc) = self.behavior().retry_catch() {
            for catcher in &rc.catch {
                edges.push(Edge {
                    target: catcher.next.clone(),
                    kind: EdgeKind::Catch,
                    label: Some(catcher.error_equals.join(", ")),
                });
            }
        }
        edges
    }

    /// Earliest time the running state is known to be blocked until.
    pub fn wait_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        if !ctx.state_started() || ctx.state_finished() {
            return None;
        }
        ctx.state
            .scratch_time(RETRY_AT_KEY)
            .or_else(|| self.behavior().blocked_until(ctx))
    }

    /// Clean up runner work still held by the running state.
    pub fn release(&self, ctx: &mut Context) {
        if ctx.state_started() && !ctx.state_finished() {
            self.behavior().release(ctx);
        }
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    /// Advance the current state of `ctx` by at most one unit of progress.
    ///
    /// Calling this on a finished state is a no-op returning [`Step::Done`].
    pub fn advance(&self, ctx: &mut Context, tick: &Tick<'_>) -> Step {
        if ctx.state_finished() {
            return Step::Done;
        }

        let behavior = self.behavior();
        if !ctx.state_started() {
            ctx.enter_state(tick.now);
            tracing::info!(
                state = %self.name,
                state_type = self.type_name(),
                execution_id = %ctx.execution.id,
                guid = ?ctx.state.guid,
                "running state"
            );
            if let Err(error) = behavior.start(ctx, tick) {
                return self.recover(ctx, &error, tick);
            }
        }

        if let Some(retry_at) = ctx.state.scratch_time(RETRY_AT_KEY) {
            if tick.now < retry_at {
                return Step::BlockedUntil(retry_at);
            }
            ctx.state.take_scratch(RETRY_AT_KEY);
            tracing::debug!(state = %self.name, "restarting state after retry delay");
            if let Err(error) = behavior.start(ctx, tick) {
                return self.recover(ctx, &error, tick);
            }
        }

        match behavior.poll(ctx, tick) {
            Ok(Progress::Running) => Step::Pending,
            Ok(Progress::BlockedUntil(at)) => Step::BlockedUntil(at),
            Ok(Progress::Complete) => self.finish(ctx, tick.now),
            Err(error) => self.recover(ctx, &error, tick),
        }
    }

    fn recover(&self, ctx: &mut Context, error: &ExecutionError, tick: &Tick<'_>) -> Step {
        match self.behavior().retry_catch() {
            Some(rc) => match rc.recover(ctx, error, tick.now) {
                Recovery::Retry(at) => Step::BlockedUntil(at),
                Recovery::Caught | Recovery::Failed => self.finish(ctx, tick.now),
            },
            None => {
                RetryCatch::fail(ctx, error);
                self.finish(ctx, tick.now)
            }
        }
    }

    fn finish(&self, ctx: &mut Context, now: DateTime<Utc>) -> Step {
        let next = ctx.state.next_state.clone();
        let failed = ctx.state.error.is_some();
        ctx.finish_state(now);
        tracing::debug!(
            state = %self.name,
            next = next.as_deref().unwrap_or("<end>"),
            failed,
            "state finished"
        );
        Step::Done
    }
}
