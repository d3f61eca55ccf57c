//! File-backed execution checkpoint store.
//!
//! Implements `ContextRepository` from `statewise-core` with one pretty JSON
//! file per execution (`<dir>/<execution_id>.json`). Saves go through a temp
//! file and a rename so a crash mid-write never leaves a torn checkpoint.

use std::path::{Path, PathBuf};

use statewise_core::repository::context::ContextRepository;
use statewise_types::context::{Context, ExecutionSummary};
use statewise_types::error::RepositoryError;
use uuid::Uuid;

/// Directory of `<execution_id>.json` context files.
#[derive(Debug, Clone)]
pub struct FileContextRepository {
    dir: PathBuf,
}

impl FileContextRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, execution_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::Connection(format!("{}: {err}", path.display()))
}

impl ContextRepository for FileContextRepository {
    async fn save_context(&self, ctx: &Context) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let content = serde_json::to_string_pretty(ctx)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let path = self.path_for(&ctx.execution.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(())
    }

    async fn load_context(&self, execution_id: &Uuid) -> Result<Option<Context>, RepositoryError> {
        let path = self.path_for(execution_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, err)),
        };
        Context::from_json(&content)
            .map(Some)
            .map_err(|e| RepositoryError::Serialization(format!("{}: {e}", path.display())))
    }

    async fn list_executions(&self, limit: Option<usize>) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.dir, err)),
        };

        let mut rows = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|content| Context::from_json(&content).ok());
            match parsed {
                Some(ctx) => rows.push(ExecutionSummary::from(&ctx)),
                None => tracing::warn!(path = %path.display(), "skipping unreadable checkpoint"),
            }
        }

        // Most recent first; never-started executions last.
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn delete_context(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let path = self.path_for(execution_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}
