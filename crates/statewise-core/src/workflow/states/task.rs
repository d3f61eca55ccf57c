use std::sync::Arc;

use chrono::TimeDelta;
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{codes, DefinitionError, ExecutionError};
use statewise_types::runner::{RunnerHandle, RunnerPoll};

use super::{complete, Behavior, Progress, Tick};
use crate::runner::{Runner, RunnerRegistry};
use crate::workflow::definition::{Fields, Transition};
use crate::workflow::io::InputOutput;
use crate::workflow::reference_path::ReferencePath;
use crate::workflow::retry::RetryCatch;
use crate::workflow::template::PayloadTemplate;

const HANDLE_KEY: &str = "RunnerHandle";
const TIMEOUT_AT_KEY: &str = "TimeoutAt";

#[derive(Debug, Clone, PartialEq)]
enum Timeout {
    Seconds(u64),
    Path(ReferencePath),
}

/// Runs its `Resource` through a registered [`Runner`].
pub struct Task {
    pub(crate) resource: String,
    runner: Arc<dyn Runner>,
    pub(crate) io: InputOutput,
    credentials: Option<PayloadTemplate>,
    timeout: Option<Timeout>,
    pub(crate) retry_catch: RetryCatch,
    pub(crate) transition: Transition,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("resource", &self.resource)
            .field("runner", &self.runner.name())
            .field("timeout", &self.timeout)
            .field("transition", &self.transition)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn parse(fields: &Fields<'_>, registry: &RunnerRegistry) -> Result<Self, DefinitionError> {
        let resource = fields.required_str("Resource")?.to_string();
        let runner = registry.for_resource(&resource).map_err(|_| {
            fields.invalid("Resource", &Value::String(resource.clone()), "has no registered runner")
        })?;

        fields.exclusive("TimeoutSeconds", "TimeoutSecondsPath")?;
        let timeout = match fields.positive("TimeoutSeconds")? {
            Some(seconds) => Some(Timeout::Seconds(seconds)),
            None => fields.reference_path("TimeoutSecondsPath")?.map(Timeout::Path),
        };

        Ok(Self {
            resource,
            runner,
            io: InputOutput::parse(fields, true, true)?,
            credentials: fields.template("Credentials")?,
            timeout,
            retry_catch: RetryCatch::parse(fields)?,
            transition: fields.transition()?,
        })
    }

    fn timeout_seconds(&self, input: &Value) -> Result<Option<i64>, ExecutionError> {
        match &self.timeout {
            None => Ok(None),
            Some(Timeout::Seconds(seconds)) => Ok(Some(*seconds as i64)),
            Some(Timeout::Path(path)) => {
                let value = path.value(input)?;
                match value.as_i64() {
                    Some(n) if n > 0 => Ok(Some(n)),
                    _ => Err(ExecutionError::runtime(format!(
                        "field \"TimeoutSecondsPath\" value \"{value}\" must be a positive integer"
                    ))),
                }
            }
        }
    }

    fn handle(ctx: &Context) -> Result<RunnerHandle, ExecutionError> {
        let raw = ctx
            .state
            .scratch(HANDLE_KEY)
            .cloned()
            .ok_or_else(|| ExecutionError::runtime("task has no runner handle"))?;
        serde_json::from_value(raw)
            .map_err(|e| ExecutionError::runtime(format!("invalid runner handle: {e}")))
    }

    fn release_handle(&self, ctx: &mut Context, handle: &RunnerHandle) {
        if let Err(e) = self.runner.cleanup(handle) {
            tracing::warn!(resource = %self.resource, handle = %handle.id, error = %e, "runner cleanup failed");
        }
        ctx.state.take_scratch(HANDLE_KEY);
        ctx.state.take_scratch(TIMEOUT_AT_KEY);
    }
}

impl Behavior for Task {
    fn start(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let raw = ctx.state.input.clone();
        let input = self.io.process_input(&context, &raw)?;
        let credentials = match &self.credentials {
            Some(template) => Some(template.value(&context, &tick.credentials.expose())?),
            None => None,
        };
        let timeout = self.timeout_seconds(&raw)?;

        let handle = self
            .runner
            .start(&self.resource, &input, credentials.as_ref())
            .map_err(|e| ExecutionError::task_failed(e.to_string()))?;
        tracing::debug!(resource = %self.resource, handle = %handle.id, "task started");

        let stored = serde_json::to_value(&handle)
            .map_err(|e| ExecutionError::runtime(format!("invalid runner handle: {e}")))?;
        ctx.state.set_scratch(HANDLE_KEY, stored);
        match timeout {
            Some(seconds) => ctx
                .state
                .set_scratch_time(TIMEOUT_AT_KEY, tick.now + TimeDelta::seconds(seconds)),
            None => {
                ctx.state.take_scratch(TIMEOUT_AT_KEY);
            }
        }
        Ok(())
    }

    fn poll(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        let handle = Self::handle(ctx)?;

        if let Some(deadline) = ctx.state.scratch_time(TIMEOUT_AT_KEY) {
            if tick.now >= deadline {
                self.release_handle(ctx, &handle);
                return Err(ExecutionError::new(
                    codes::TIMEOUT,
                    Some(format!("{} did not finish before {deadline}", self.resource)),
                ));
            }
        }

        match self.runner.poll(&handle) {
            Ok(RunnerPoll::Running) => Ok(Progress::Running),
            Ok(RunnerPoll::Succeeded(result)) => {
                self.release_handle(ctx, &handle);
                let context = ctx.to_value();
                let raw = ctx.state.input.clone();
                let output = self.io.process_output(&context, &raw, result)?;
                Ok(complete(ctx, output, &self.transition))
            }
            Ok(RunnerPoll::Failed { error, cause }) => {
                self.release_handle(ctx, &handle);
                Err(ExecutionError::new(error, cause))
            }
            Err(e) => {
                self.release_handle(ctx, &handle);
                Err(ExecutionError::task_failed(e.to_string()))
            }
        }
    }

    fn retry_catch(&self) -> Option<&RetryCatch> {
        Some(&self.retry_catch)
    }

    fn release(&self, ctx: &mut Context) {
        if let Ok(handle) = Self::handle(ctx) {
            self.release_handle(ctx, &handle);
        }
    }
}
