//! Commands over checkpointed executions in the data directory.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Subcommand;
use console::style;
use statewise_core::workflow::executor::{ExecutorError, WorkflowExecutor};
use uuid::Uuid;

use super::{input, render, workflow};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List checkpointed executions, newest first.
    List {
        /// Show at most this many executions.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show an execution's status and history.
    Show {
        /// Execution id.
        id: Uuid,
    },

    /// Continue an execution from its last checkpoint.
    Resume {
        /// Execution id.
        id: Uuid,

        /// Workflow definition the execution was started from.
        workflow: PathBuf,

        /// Credentials: JSON object text or @file.
        #[arg(long, env = "STATEWISE_CREDENTIALS", hide_env_values = true)]
        credentials: Option<String>,

        /// Give up after this many seconds (progress is kept).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete an execution's checkpoint.
    Delete {
        /// Execution id.
        id: Uuid,
    },
}

pub async fn handle(state: &AppState, command: ExecutionCommand, json: bool) -> Result<()> {
    match command {
        ExecutionCommand::List { limit } => list(state, limit, json).await,
        ExecutionCommand::Show { id } => show(state, id, json).await,
        ExecutionCommand::Resume {
            id,
            workflow,
            credentials,
            timeout,
        } => resume(state, id, &workflow, credentials.as_deref(), timeout, json).await,
        ExecutionCommand::Delete { id } => delete(state, id, json).await,
    }
}

async fn list(state: &AppState, limit: usize, json: bool) -> Result<()> {
    let rows = state.executor(None).checkpoints().list(Some(limit)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  No executions in {}", style(state.repo.dir().display()).dim());
        println!();
        return Ok(());
    }

    println!("{}", render::executions_table(&rows));
    println!();
    println!("  {} execution(s)", rows.len());
    Ok(())
}

async fn show(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let ctx = state.executor(None).checkpoints().restore(id).await?;
    render::print_context(&ctx, json)
}

async fn resume(
    state: &AppState,
    id: Uuid,
    workflow_path: &std::path::Path,
    credentials: Option<&str>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let credentials = input::credentials(credentials).await?;
    let wf = state.load_workflow(workflow_path, credentials)?;
    let result = match state.executor(timeout).resume(&wf, id).await {
        Ok(result) => result,
        Err(ExecutorError::ExecutionNotFound(id)) => bail!("No checkpoint for execution {id}"),
        Err(err) => return Err(err.into()),
    };
    workflow::print_result(&result, json)
}

async fn delete(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let existed = state.executor(None).checkpoints().discard(id).await?;

    if json {
        println!("{}", serde_json::json!({ "execution_id": id, "deleted": existed }));
        return Ok(());
    }
    if existed {
        println!("  {} Deleted execution {}", style("✓").green(), style(id).cyan());
    } else {
        println!("  {} No checkpoint for execution {}", style("!").yellow(), id);
    }
    Ok(())
}
