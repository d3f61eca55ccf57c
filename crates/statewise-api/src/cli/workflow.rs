//! Workflow commands: run, step, status, validate, graph.

use std::path::Path;

use anyhow::Result;
use console::style;
use serde_json::json;
use statewise_core::workflow::executor::{ExecutionResult, WorkflowExecutor};
use statewise_core::workflow::graph::StateGraph;
use statewise_core::workflow::{RunOutcome, Step};

use super::input;
use super::render;
use crate::state::AppState;

/// Run a workflow to completion (or timeout).
///
/// # Examples
///
/// ```bash
/// # Checkpointed in the data directory
/// statewise run flow.yaml --input '{"orderId": 7}'
///
/// # Progress kept in a context file
/// statewise run flow.yaml --context order-7.json --timeout 60
/// ```
pub async fn run(
    state: &AppState,
    workflow: &Path,
    raw_input: Option<&str>,
    context: Option<&Path>,
    credentials: Option<&str>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let credentials = input::credentials(credentials).await?;
    let wf = state.load_workflow(workflow, credentials)?;

    let Some(context) = context else {
        let execution_input = input::execution_input(raw_input).await?;
        let result = state.executor(timeout).execute(&wf, execution_input).await?;
        return print_result(&result, json);
    };

    let mut ctx = input::load_or_create_context(context, &wf, raw_input).await?;
    let options = state.run_options(timeout);
    let outcome = wf.run(&mut ctx, &options).await;
    // Whatever happened, keep the progress.
    input::save_context(context, &ctx).await?;
    let outcome = outcome?;

    if !json && outcome == RunOutcome::TimedOut {
        println!(
            "  {} Timed out in state '{}', progress saved to {}",
            style("⏱").yellow(),
            ctx.state_name().unwrap_or_default(),
            context.display()
        );
    }
    render::print_context(&ctx, json)
}

/// Advance a context file by one non-blocking step.
pub async fn step(
    state: &AppState,
    workflow: &Path,
    context: &Path,
    raw_input: Option<&str>,
    credentials: Option<&str>,
    json: bool,
) -> Result<()> {
    let credentials = input::credentials(credentials).await?;
    let wf = state.load_workflow(workflow, credentials)?;
    let mut ctx = input::load_or_create_context(context, &wf, raw_input).await?;

    let result = wf.advance(&mut ctx);
    input::save_context(context, &ctx).await?;
    let step = result?;

    if json {
        let mut summary = render::context_summary(&ctx);
        summary["step"] = match step {
            Step::Done => json!("done"),
            Step::Pending => json!("pending"),
            Step::BlockedUntil(at) => json!({"blocked_until": at}),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    match step {
        Step::Done => {}
        Step::Pending => println!("  {} Waiting on '{}'", style("…").cyan(), ctx.state_name().unwrap_or_default()),
        Step::BlockedUntil(at) => println!(
            "  {} '{}' is blocked until {}",
            style("…").cyan(),
            ctx.state_name().unwrap_or_default(),
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
    render::print_context(&ctx, false)
}

/// Show a context file without advancing it.
pub async fn status(context: &Path, json: bool) -> Result<()> {
    let ctx = input::read_context(context).await?;
    render::print_context(&ctx, json)
}

/// Validate a definition and report states `StartAt` never reaches.
pub fn validate(state: &AppState, workflow: &Path, json: bool) -> Result<()> {
    let wf = state.load_workflow(workflow, Default::default())?;
    let machine = wf.machine();
    let unreachable = StateGraph::build(machine).unreachable();

    if json {
        let report = json!({
            "valid": true,
            "start_at": machine.start_at(),
            "states": machine.len(),
            "unreachable": unreachable,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "  {} {} is valid ({} states, starts at '{}')",
        style("✓").green(),
        style(workflow.display()).cyan(),
        machine.len(),
        machine.start_at()
    );
    for name in &unreachable {
        println!("  {} State '{}' is unreachable", style("!").yellow(), name);
    }
    Ok(())
}

/// Print the state graph as Graphviz DOT.
pub fn graph(state: &AppState, workflow: &Path) -> Result<()> {
    let wf = state.load_workflow(workflow, Default::default())?;
    println!("{}", StateGraph::build(wf.machine()).to_dot());
    Ok(())
}

pub(crate) fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let report = json!({
            "execution_id": result.execution_id,
            "status": result.status,
            "output": result.output,
            "timed_out": result.timed_out,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution {}  {}",
        style(result.execution_id).cyan(),
        render::format_status(result.status)
    );
    if result.timed_out {
        println!(
            "  {} Timed out; continue with: statewise executions resume {} <WORKFLOW>",
            style("⏱").yellow(),
            result.execution_id
        );
        return Ok(());
    }
    println!();
    render::print_output(result.output.as_ref())
}


#[cfg(test)]
mod tests {
    use super::*;
    use statewise_infra::checkpoint::FileContextRepository;
    use statewise_infra::runner::default_registry;
    use statewise_types::config::EngineConfig;
    use tempfile::TempDir;

    const PASS_FLOW: &str = r#"
StartAt: Greet
States:
  Greet:
    Type: Pass
    Parameters:
      greeting.$: "States.Format('hello {}', $.name)"
    Next: Done
  Done:
    Type: Succeed
  Orphan:
    Type: Succeed
"#;

    fn fixture() -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default();
        let state = AppState {
            data_dir: tmp.path().to_path_buf(),
            registry: default_registry(&config),
            repo: FileContextRepository::new(tmp.path().join("executions")),
            config,
        };
        std::fs::write(tmp.path().join("flow.yaml"), PASS_FLOW).unwrap();
        (tmp, state)
    }

    #[test]
    fn test_validate_accepts_flow_and_rejects_garbage() {
        let (tmp, state) = fixture();
        validate(&state, &tmp.path().join("flow.yaml"), true).unwrap();

        std::fs::write(tmp.path().join("bad.json"), r#"{"StartAt": "Nope", "States": {}}"#).unwrap();
        assert!(validate(&state, &tmp.path().join("bad.json"), true).is_err());
    }

    #[tokio::test]
    async fn test_run_with_context_file_saves_finished_context() {
        let (tmp, state) = fixture();
        let context = tmp.path().join("ctx.json");
        run(
            &state,
            &tmp.path().join("flow.yaml"),
            Some(r#"{"name": "ada"}"#),
            Some(&context),
            None,
            None,
            true,
        )
        .await
        .unwrap();

        let ctx = input::read_context(&context).await.unwrap();
        assert!(ctx.ended());
        assert_eq!(ctx.state_history.len(), 2);
        assert_eq!(ctx.output(), Some(&json!({"greeting": "hello ada"})));
    }

    #[tokio::test]
    async fn test_run_without_context_checkpoints_in_data_dir() {
        let (tmp, state) = fixture();
        run(&state, &tmp.path().join("flow.yaml"), Some(r#"{"name": "bo"}"#), None, None, None, true)
            .await
            .unwrap();

        let rows = state.executor(None).checkpoints().list(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, statewise_types::context::ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_step_advances_one_state_at_a_time() {
        let (tmp, state) = fixture();
        let flow = tmp.path().join("flow.yaml");
        let context = tmp.path().join("ctx.json");

        step(&state, &flow, &context, Some(r#"{"name": "cy"}"#), None, true).await.unwrap();
        let ctx = input::read_context(&context).await.unwrap();
        assert_eq!(ctx.state_history.len(), 1);
        assert_eq!(ctx.state_name(), Some("Done"));

        step(&state, &flow, &context, None, None, true).await.unwrap();
        let ctx = input::read_context(&context).await.unwrap();
        assert!(ctx.ended());
    }
}
