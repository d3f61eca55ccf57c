use statewise_types::context::Context;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::{Behavior, Progress, Tick};
use crate::workflow::definition::Fields;
use crate::workflow::io::InputOutput;

/// Ends the execution successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct Succeed {
    pub(crate) io: InputOutput,
}

impl Succeed {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        Ok(Self {
            io: InputOutput::parse(fields, false, false)?,
        })
    }
}

impl Behavior for Succeed {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let input = self.io.filter_input(&context, &ctx.state.input)?;
        ctx.state.output = Some(self.io.filter_output(&context, &input)?);
        ctx.state.next_state = None;
        Ok(())
    }

    fn poll(&self, _ctx: &mut Context, _tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        Ok(Progress::Complete)
    }
}
