//! Durable checkpoint manager for execution contexts.
//!
//! Wraps `ContextRepository` to provide a higher-level API for recording
//! execution progress. The context is the entire checkpoint, so every save
//! replaces the previous one and a restored context resumes exactly where
//! the last save left off.

use statewise_types::context::{Context, ExecutionSummary};
use uuid::Uuid;

use crate::repository::context::ContextRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints.
///
/// Generic over `R: ContextRepository` so it works with any storage backend
/// (JSON files, in-memory mock, etc.).
pub struct CheckpointManager<R: ContextRepository> {
    repo: R,
}

impl<R: ContextRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Persist the current context.
    pub async fn checkpoint(&self, ctx: &Context) -> Result<(), CheckpointError> {
        self.repo
            .save_context(ctx)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %ctx.execution.id,
            state = ctx.state_name().unwrap_or_default(),
            history = ctx.state_history.len(),
            "checkpointed context"
        );
        Ok(())
    }

    /// Restore the last persisted context of an execution.
    pub async fn restore(&self, execution_id: Uuid) -> Result<Context, CheckpointError> {
        self.repo
            .load_context(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(execution_id))
    }

    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<ExecutionSummary>, CheckpointError> {
        self.repo
            .list_executions(limit)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete a checkpoint. Returns `true` if it existed.
    pub async fn discard(&self, execution_id: Uuid) -> Result<bool, CheckpointError> {
        self.repo
            .delete_context(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// No checkpoint exists for the execution.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
