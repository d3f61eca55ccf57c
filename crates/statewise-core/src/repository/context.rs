//! Execution context repository trait definition.
//!
//! Defines the storage interface for persisted execution contexts. The
//! infrastructure layer (statewise-infra) implements it with one JSON file
//! per execution.

use statewise_types::context::{Context, ExecutionSummary};
use statewise_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for execution checkpoints.
///
/// A checkpoint is the whole [`Context`]; saving replaces the previous one.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ContextRepository: Send + Sync {
    /// Insert or replace the context of an execution.
    fn save_context(
        &self,
        ctx: &Context,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the last saved context of an execution.
    fn load_context(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Context>, RepositoryError>> + Send;

    /// List executions, most recently started first.
    fn list_executions(
        &self,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionSummary>, RepositoryError>> + Send;

    /// Delete an execution's context. Returns `true` if it existed.
    fn delete_context(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
