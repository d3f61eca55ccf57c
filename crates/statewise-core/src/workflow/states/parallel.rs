use chrono::{DateTime, Utc};
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::{complete, Behavior, Progress, Tick};
use crate::runner::RunnerRegistry;
use crate::workflow::definition::{Fields, Transition};
use crate::workflow::fan_out::{self, FanOut, Policy};
use crate::workflow::io::InputOutput;
use crate::workflow::machine::StateMachine;
use crate::workflow::retry::RetryCatch;

pub(crate) const BRANCHES_KEY: &str = "BranchContext";

/// Runs every branch on the same input and collects their outputs.
#[derive(Debug)]
pub struct Parallel {
    pub(crate) branches: Vec<StateMachine>,
    pub(crate) io: InputOutput,
    pub(crate) retry_catch: RetryCatch,
    pub(crate) transition: Transition,
}

impl Parallel {
    pub fn parse(fields: &Fields<'_>, registry: &RunnerRegistry) -> Result<Self, DefinitionError> {
        let raw = fields.array("Branches")?.ok_or_else(|| fields.missing("Branches"))?;
        let branches = raw
            .iter()
            .enumerate()
            .map(|(i, branch)| StateMachine::parse(&format!("{}.Branches[{i}]", fields.scope()), branch, registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            branches,
            io: InputOutput::parse(fields, true, true)?,
            retry_catch: RetryCatch::parse(fields)?,
            transition: fields.transition()?,
        })
    }
}

impl Behavior for Parallel {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let input = self.io.process_input(&context, &ctx.state.input)?;
        let inputs = vec![input; self.branches.len()];
        self.release(ctx);
        fan_out::seed(ctx, BRANCHES_KEY, inputs, |i| self.branches.get(i));
        Ok(())
    }

    fn poll(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        let policy = Policy {
            max_concurrency: None,
            fail_fast: true,
        };
        match fan_out::step(ctx, BRANCHES_KEY, |i| self.branches.get(i), policy, tick)? {
            FanOut::Running => return Ok(Progress::Running),
            FanOut::BlockedUntil(at) => return Ok(Progress::BlockedUntil(at)),
            FanOut::Complete => {}
        }

        let children = fan_out::load(ctx, BRANCHES_KEY)?;
        if children.iter().any(Context::failed) {
            self.release(ctx);
            return Err(fan_out::first_failure(&children));
        }

        let context = ctx.to_value();
        let raw = ctx.state.input.clone();
        let result = Value::Array(fan_out::outputs(&children));
        let output = self.io.process_output(&context, &raw, result)?;
        Ok(complete(ctx, output, &self.transition))
    }

    fn retry_catch(&self) -> Option<&RetryCatch> {
        Some(&self.retry_catch)
    }

    fn blocked_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        fan_out::wait_until(ctx, BRANCHES_KEY, |i| self.branches.get(i))
    }

    fn release(&self, ctx: &mut Context) {
        fan_out::release(ctx, BRANCHES_KEY, |i| self.branches.get(i));
    }
}
