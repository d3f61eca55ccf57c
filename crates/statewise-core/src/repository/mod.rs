//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (statewise-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod context;

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory repository for executor tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use statewise_types::context::{Context, ExecutionSummary};
    use statewise_types::error::RepositoryError;
    use uuid::Uuid;

    use super::context::ContextRepository;

    #[derive(Default)]
    pub struct MemoryRepository {
        contexts: Mutex<HashMap<Uuid, Context>>,
        saves: Mutex<usize>,
    }

    impl MemoryRepository {
        pub fn save_count(&self) -> usize {
            *self.saves.lock().unwrap()
        }
    }

    impl ContextRepository for MemoryRepository {
        async fn save_context(&self, ctx: &Context) -> Result<(), RepositoryError> {
            *self.saves.lock().unwrap() += 1;
            self.contexts.lock().unwrap().insert(ctx.execution.id, ctx.clone());
            Ok(())
        }

        async fn load_context(&self, execution_id: &Uuid) -> Result<Option<Context>, RepositoryError> {
            Ok(self.contexts.lock().unwrap().get(execution_id).cloned())
        }

        async fn list_executions(&self, limit: Option<usize>) -> Result<Vec<ExecutionSummary>, RepositoryError> {
            let contexts = self.contexts.lock().unwrap();
            let mut rows: Vec<ExecutionSummary> = contexts.values().map(ExecutionSummary::from).collect();
            rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            rows.truncate(limit.unwrap_or(usize::MAX));
            Ok(rows)
        }

        async fn delete_context(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.contexts.lock().unwrap().remove(execution_id).is_some())
        }
    }
}
