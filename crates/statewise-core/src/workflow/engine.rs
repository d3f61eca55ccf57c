//! The loaded workflow and its drivers.
//!
//! [`Workflow`] pairs a validated [`StateMachine`] with the credentials its
//! Tasks may reference. Driving comes in two flavors:
//! - `advance` / `run_nonblocking`: pure, non-blocking steps against a
//!   caller-owned [`Context`]
//! - `run`: an async loop over `run_nonblocking` that sleeps on the tokio
//!   timer between polls and gives up at an optional deadline

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use statewise_types::config::EngineConfig;
use statewise_types::context::{Context, ExecutionStatus};
use statewise_types::credentials::Credentials;

use super::definition::{load_definition_file, parse_definition_text, WorkflowError};
use super::machine::StateMachine;
use super::states::{Step, Tick};
use crate::runner::RunnerRegistry;

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Pacing and deadline for the blocking drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Sleep between polls while a state is pending.
    pub poll_interval: Duration,
    /// Longest single sleep while blocked until a known time.
    pub max_poll_interval: Duration,
    /// Wall-clock limit for the whole run; `None` runs until the end.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(30),
            timeout: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_interval: Duration::from_millis(config.max_poll_interval_ms),
            timeout: config.default_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long to sleep after `step` before advancing again.
    pub fn pause_for(&self, step: Step, now: DateTime<Utc>) -> Duration {
        match step {
            Step::Done => Duration::ZERO,
            Step::Pending => self.poll_interval,
            Step::BlockedUntil(at) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_poll_interval),
        }
    }
}

/// How a blocking run came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The execution ended with this status.
    Finished(ExecutionStatus),
    /// The deadline passed first; the context holds all progress so far.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A validated workflow definition ready to drive executions.
#[derive(Debug, Clone)]
pub struct Workflow {
    machine: Arc<StateMachine>,
    credentials: Credentials,
    definition: Value,
}

impl Workflow {
    /// Validate a parsed definition. Task resources resolve against `registry`.
    pub fn from_value(definition: Value, registry: &RunnerRegistry) -> Result<Self, WorkflowError> {
        let machine = StateMachine::parse("Workflow", &definition, registry)?;
        tracing::debug!(
            start_at = machine.start_at(),
            states = machine.len(),
            "loaded workflow definition"
        );
        Ok(Self {
            machine: Arc::new(machine),
            credentials: Credentials::new(),
            definition,
        })
    }

    /// Parse JSON or YAML definition text.
    pub fn from_text(text: &str, registry: &RunnerRegistry) -> Result<Self, WorkflowError> {
        Self::from_value(parse_definition_text(text)?, registry)
    }

    pub fn load(path: &Path, registry: &RunnerRegistry) -> Result<Self, WorkflowError> {
        Self::from_value(load_definition_file(path)?, registry)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    /// A new execution positioned on `StartAt`.
    pub fn new_context(&self, input: Value) -> Context {
        let mut ctx = Context::new(input);
        self.machine.prepare(&mut ctx);
        ctx
    }

    /// Restore a persisted context and check it against this definition.
    pub fn load_context(&self, value: Value) -> Result<Context, WorkflowError> {
        let mut ctx = Context::from_value(value).map_err(|e| WorkflowError::InvalidContext(e.to_string()))?;
        self.prepare(&mut ctx)?;
        Ok(ctx)
    }

    /// Seed a fresh context, or verify a resumed one names a known state.
    pub fn prepare(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        self.machine.prepare(ctx);
        if !ctx.ended() {
            self.machine.current_state(ctx)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Non-blocking drivers
    // -----------------------------------------------------------------------

    /// One non-blocking step of the current state.
    pub fn advance(&self, ctx: &mut Context) -> Result<Step, WorkflowError> {
        self.advance_at(ctx, Utc::now())
    }

    pub fn advance_at(&self, ctx: &mut Context, now: DateTime<Utc>) -> Result<Step, WorkflowError> {
        self.machine.advance(ctx, &self.tick(now))
    }

    /// Finish every state that can finish right now.
    pub fn run_nonblocking(&self, ctx: &mut Context) -> Result<Step, WorkflowError> {
        self.run_nonblocking_at(ctx, Utc::now())
    }

    pub fn run_nonblocking_at(&self, ctx: &mut Context, now: DateTime<Utc>) -> Result<Step, WorkflowError> {
        self.machine.run_nonblocking(ctx, &self.tick(now))
    }

    /// Earliest time anything in `ctx` can make progress, if known.
    pub fn wait_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        self.machine.wait_until(ctx)
    }

    fn tick(&self, now: DateTime<Utc>) -> Tick<'_> {
        Tick {
            now,
            credentials: &self.credentials,
        }
    }

    // -----------------------------------------------------------------------
    // Blocking driver
    // -----------------------------------------------------------------------

    /// Drive `ctx` until the execution ends or `options.timeout` passes.
    ///
    /// A timeout leaves `ctx` exactly as the last step left it, so the run
    /// can be resumed later.
    pub async fn run(&self, ctx: &mut Context, options: &RunOptions) -> Result<RunOutcome, WorkflowError> {
        self.prepare(ctx)?;
        let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let step = self.run_nonblocking(ctx)?;
            if ctx.ended() {
                let status = ctx.status();
                tracing::info!(execution_id = %ctx.execution.id, %status, "execution finished");
                return Ok(RunOutcome::Finished(status));
            }

            let mut pause = options.pause_for(step, Utc::now());
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if left.is_zero() {
                    tracing::warn!(
                        execution_id = %ctx.execution.id,
                        state = ctx.state_name().unwrap_or_default(),
                        "execution timed out"
                    );
                    return Ok(RunOutcome::TimedOut);
                }
                pause = pause.min(left);
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(ctx: &Context) -> ExecutionStatus {
        ctx.status()
    }

    pub fn output(ctx: &Context) -> Option<&Value> {
        ctx.ended().then(|| ctx.output()).flatten()
    }

    pub fn is_ended(ctx: &Context) -> bool {
        ctx.ended()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
