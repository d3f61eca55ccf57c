use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::{complete, Behavior, Progress, Tick};
use crate::workflow::definition::{Fields, Transition};
use crate::workflow::io::InputOutput;

/// Passes its input (or a fixed `Result`) to its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    pub(crate) io: InputOutput,
    pub(crate) result: Option<Value>,
    pub(crate) transition: Transition,
}

impl Pass {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        Ok(Self {
            io: InputOutput::parse(fields, true, true)?,
            result: fields.get("Result").cloned(),
            transition: fields.transition()?,
        })
    }
}

impl Behavior for Pass {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let raw = ctx.state.input.clone();
        let result = match &self.result {
            Some(result) => result.clone(),
            None => self.io.process_input(&context, &raw)?,
        };
        let output = self.io.process_output(&context, &raw, result)?;
        complete(ctx, output, &self.transition);
        Ok(())
    }

    fn poll(&self, _ctx: &mut Context, _tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        Ok(Progress::Complete)
    }
}
