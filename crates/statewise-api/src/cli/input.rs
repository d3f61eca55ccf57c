//! Reading CLI-supplied JSON, credentials and context files.

use std::path::Path;

use anyhow::{bail, Context as _, Result};
use serde_json::Value;
use statewise_core::workflow::Workflow;
use statewise_types::context::Context;
use statewise_types::credentials::Credentials;

/// Parse a JSON argument given inline or as `@path`.
pub async fn json_arg(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Invalid JSON")
}

/// Execution input; `{}` when not given.
pub async fn execution_input(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => json_arg(raw).await.context("Invalid --input"),
        None => Ok(Value::Object(Default::default())),
    }
}

pub async fn credentials(raw: Option<&str>) -> Result<Credentials> {
    let Some(raw) = raw else {
        return Ok(Credentials::new());
    };
    let value = json_arg(raw).await.context("Invalid --credentials")?;
    match Credentials::from_json(&value) {
        Some(credentials) => Ok(credentials),
        None => bail!("--credentials must be a JSON object"),
    }
}

/// Load a context file, or start a new execution if it does not exist yet.
pub async fn load_or_create_context(path: &Path, workflow: &Workflow, input: Option<&str>) -> Result<Context> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        let input = execution_input(input).await?;
        return Ok(workflow.new_context(input));
    }
    if input.is_some() {
        tracing::warn!(path = %path.display(), "context exists, ignoring --input");
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    workflow
        .load_context(value)
        .with_context(|| format!("{} does not match the workflow", path.display()))
}

pub async fn read_context(path: &Path) -> Result<Context> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Context::from_json(&content).with_context(|| format!("{} is not a valid context", path.display()))
}

pub async fn save_context(path: &Path, ctx: &Context) -> Result<()> {
    let content = serde_json::to_string_pretty(ctx)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statewise_core::runner::RunnerRegistry;
    use tempfile::TempDir;

    fn workflow() -> Workflow {
        Workflow::from_value(
            json!({"StartAt": "A", "States": {"A": {"Type": "Pass", "End": true}}}),
            &RunnerRegistry::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_json_arg_inline_and_file() {
        assert_eq!(json_arg("{\"a\": 1}").await.unwrap(), json!({"a": 1}));

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("input.json");
        tokio::fs::write(&path, "[1, 2]").await.unwrap();
        assert_eq!(json_arg(&format!("@{}", path.display())).await.unwrap(), json!([1, 2]));

        assert!(json_arg("{oops").await.is_err());
        assert!(json_arg("@/definitely/not/here.json").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_input_is_empty_object() {
        assert_eq!(execution_input(None).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_credentials_must_be_object() {
        assert!(credentials(None).await.unwrap().is_empty());
        let creds = credentials(Some("{\"token\": \"abc\"}")).await.unwrap();
        assert_eq!(creds.keys().collect::<Vec<_>>(), vec!["token"]);
        assert!(credentials(Some("[1]")).await.is_err());
    }

    #[tokio::test]
    async fn test_context_file_is_created_then_resumed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ctx.json");
        let wf = workflow();

        let ctx = load_or_create_context(&path, &wf, Some("{\"x\": 1}")).await.unwrap();
        assert_eq!(ctx.state_name(), Some("A"));
        assert_eq!(ctx.execution.input, json!({"x": 1}));
        save_context(&path, &ctx).await.unwrap();

        let again = load_or_create_context(&path, &wf, None).await.unwrap();
        assert_eq!(again, ctx);
        assert_eq!(read_context(&path).await.unwrap(), ctx);
    }
}
