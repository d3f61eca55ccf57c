//! Checkpointing executor: drives executions to completion with durable progress.
//!
//! The `Executor` runs the same loop as [`Workflow::run`] but saves the
//! context through a [`CheckpointManager`] whenever a step changes it, so a
//! crashed or timed-out execution resumes from its last saved state.
//!
//! # Execution flow
//!
//! 1. Create a context (or restore one for resume) and checkpoint it.
//! 2. Advance one step; checkpoint if the current state or history changed.
//! 3. Sleep per [`RunOptions::pause_for`] until the execution ends.
//! 4. On deadline, report `timed_out`; every change is already saved.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use statewise_types::context::{Context, ExecutionStatus};
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::definition::WorkflowError;
use super::engine::{RunOptions, Workflow};
use crate::repository::context::ContextRepository;

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the project's Rust 2024 edition approach.
pub trait WorkflowExecutor: Send + Sync {
    /// Start a new execution of `workflow` with `input`.
    fn execute(
        &self,
        workflow: &Workflow,
        input: Value,
    ) -> impl std::future::Future<Output = Result<ExecutionResult, ExecutorError>> + Send;

    /// Continue a persisted execution from its last checkpoint.
    fn resume(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<ExecutionResult, ExecutorError>> + Send;
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Where an execution stood when the executor returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Final output; `None` until the execution ends.
    pub output: Option<Value>,
    /// The deadline passed before the execution ended.
    pub timed_out: bool,
}

impl ExecutionResult {
    fn from_context(ctx: &Context, timed_out: bool) -> Self {
        Self {
            execution_id: ctx.execution.id,
            status: ctx.status(),
            output: Workflow::output(ctx).cloned(),
            timed_out,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Checkpointing executor.
///
/// Generic over `R: ContextRepository` for storage flexibility.
pub struct Executor<R: ContextRepository> {
    checkpoint: Arc<CheckpointManager<R>>,
    options: RunOptions,
}

impl<R: ContextRepository> Executor<R> {
    pub fn new(repo: R, options: RunOptions) -> Self {
        Self {
            checkpoint: Arc::new(CheckpointManager::new(repo)),
            options,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Advance until the execution ends or the deadline passes.
    ///
    /// Returns `true` on timeout.
    async fn drive(&self, workflow: &Workflow, ctx: &mut Context) -> Result<bool, ExecutorError> {
        let deadline = self.options.timeout.map(|t| tokio::time::Instant::now() + t);
        self.checkpoint.checkpoint(ctx).await?;

        while !ctx.ended() {
            let before = ctx.state.clone();
            let finished = ctx.state_history.len();
            let step = workflow.advance(ctx)?;
            if ctx.state_history.len() != finished || ctx.state != before {
                self.checkpoint.checkpoint(ctx).await?;
            }
            if ctx.ended() {
                break;
            }

            let mut pause = self.options.pause_for(step, Utc::now());
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if left.is_zero() {
                    tracing::warn!(
                        execution_id = %ctx.execution.id,
                        state = ctx.state_name().unwrap_or_default(),
                        "execution timed out, progress saved"
                    );
                    return Ok(true);
                }
                pause = pause.min(left);
            }
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        tracing::info!(
            execution_id = %ctx.execution.id,
            status = %ctx.status(),
            states = ctx.state_history.len(),
            "execution finished"
        );
        Ok(false)
    }
}

impl<R: ContextRepository> WorkflowExecutor for Executor<R> {
    async fn execute(&self, workflow: &Workflow, input: Value) -> Result<ExecutionResult, ExecutorError> {
        let mut ctx = workflow.new_context(input);
        tracing::info!(
            execution_id = %ctx.execution.id,
            start_at = workflow.machine().start_at(),
            "starting execution"
        );
        let timed_out = self.drive(workflow, &mut ctx).await?;
        Ok(ExecutionResult::from_context(&ctx, timed_out))
    }

    async fn resume(&self, workflow: &Workflow, execution_id: Uuid) -> Result<ExecutionResult, ExecutorError> {
        let mut ctx = self.checkpoint.restore(execution_id).await.map_err(|e| match e {
            CheckpointError::ExecutionNotFound(id) => ExecutorError::ExecutionNotFound(id),
            other => ExecutorError::Checkpoint(other),
        })?;
        if ctx.ended() {
            tracing::debug!(execution_id = %execution_id, "execution already ended, nothing to resume");
            return Ok(ExecutionResult::from_context(&ctx, false));
        }

        workflow.prepare(&mut ctx)?;
        tracing::info!(
            execution_id = %execution_id,
            state = ctx.state_name().unwrap_or_default(),
            completed = ctx.state_history.len(),
            "resuming execution"
        );
        let timed_out = self.drive(workflow, &mut ctx).await?;
        Ok(ExecutionResult::from_context(&ctx, timed_out))
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpointed execution.
///
/// Failed executions and timeouts are not errors: they are reported through
/// [`ExecutionResult`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Definition or context error.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Checkpoint persistence error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Resume was asked for an execution with no checkpoint.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
