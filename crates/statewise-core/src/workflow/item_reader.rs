//! Map `ItemReader`: loads the item list through a runner instead of `ItemsPath`.

use std::sync::Arc;

use serde_json::Value;
use statewise_types::error::{codes, DefinitionError, ExecutionError};
use statewise_types::runner::{RunnerHandle, RunnerPoll};

use super::definition::Fields;
use super::reference_path::ReferencePath;
use super::template::PayloadTemplate;
use crate::runner::{Runner, RunnerRegistry};

pub struct ItemReader {
    resource: String,
    runner: Arc<dyn Runner>,
    parameters: Option<PayloadTemplate>,
    max_items: Option<u64>,
    max_items_path: Option<ReferencePath>,
}

impl std::fmt::Debug for ItemReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemReader")
            .field("resource", &self.resource)
            .field("runner", &self.runner.name())
            .field("max_items", &self.max_items)
            .finish()
    }
}

fn reader_failed(cause: impl Into<String>) -> ExecutionError {
    ExecutionError::new(codes::ITEM_READER_FAILED, Some(cause.into()))
}

impl ItemReader {
    pub fn parse(fields: &Fields<'_>, registry: &RunnerRegistry) -> Result<Self, DefinitionError> {
        let resource = fields.required_str("Resource")?.to_string();
        let runner = registry
            .for_resource(&resource)
            .map_err(|_| fields.invalid("Resource", &Value::String(resource.clone()), "has no registered runner"))?;

        let (max_items, max_items_path) = match fields.nested("ReaderConfig")? {
            Some(config) => {
                config.exclusive("MaxItems", "MaxItemsPath")?;
                (config.non_negative("MaxItems")?, config.reference_path("MaxItemsPath")?)
            }
            None => (None, None),
        };

        Ok(Self {
            resource,
            runner,
            parameters: fields.template("Parameters")?,
            max_items,
            max_items_path,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Start the read. `state_input` is the Map input after `InputPath`.
    pub fn start(&self, context: &Value, state_input: &Value) -> Result<RunnerHandle, ExecutionError> {
        let input = match &self.parameters {
            Some(template) => template.value(context, state_input)?,
            None => state_input.clone(),
        };
        self.runner
            .start(&self.resource, &input, None)
            .map_err(|e| reader_failed(e.to_string()))
    }

    /// Poll the read; `Some(items)` once the runner produced its list.
    pub fn poll(&self, handle: &RunnerHandle, state_input: &Value) -> Result<Option<Vec<Value>>, ExecutionError> {
        let poll = self
            .runner
            .poll(handle)
            .map_err(|e| reader_failed(e.to_string()));
        let output = match poll {
            Ok(RunnerPoll::Running) => return Ok(None),
            Ok(RunnerPoll::Succeeded(output)) => {
                self.cleanup(handle);
                output
            }
            Ok(RunnerPoll::Failed { error, cause }) => {
                self.cleanup(handle);
                return Err(ExecutionError::new(error, cause));
            }
            Err(err) => {
                self.cleanup(handle);
                return Err(err);
            }
        };

        let Value::Array(mut items) = output else {
            return Err(reader_failed(format!("{} did not produce an array", self.resource)));
        };
        if let Some(limit) = self.limit(state_input)? {
            items.truncate(limit);
        }
        Ok(Some(items))
    }

    pub fn cleanup(&self, handle: &RunnerHandle) {
        if let Err(e) = self.runner.cleanup(handle) {
            tracing::warn!(resource = %self.resource, error = %e, "item reader cleanup failed");
        }
    }

    /// Item limit; zero means no limit.
    fn limit(&self, state_input: &Value) -> Result<Option<usize>, ExecutionError> {
        let limit = match (&self.max_items, &self.max_items_path) {
            (Some(n), _) => *n,
            (None, Some(path)) => {
                let value = path.value(state_input)?;
                value.as_u64().ok_or_else(|| {
                    ExecutionError::runtime(format!(
                        "field \"MaxItemsPath\" value \"{value}\" must be a non-negative integer"
                    ))
                })?
            }
            (None, None) => 0,
        };
        Ok((limit > 0).then_some(limit as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{FakeRunner, Script};
    use serde_json::json;

    fn registry(runner: Arc<FakeRunner>) -> RunnerRegistry {
        RunnerRegistry::new().with("fake", runner)
    }

    fn reader(def: Value, runner: Arc<FakeRunner>) -> Result<ItemReader, DefinitionError> {
        ItemReader::parse(&Fields::new("States.Map.ItemReader", &def)?, &registry(runner))
    }

    #[test]
    fn test_requires_resource() {
        let err = reader(json!({}), Arc::new(FakeRunner::new())).unwrap_err();
        assert_eq!(err.to_string(), "States.Map.ItemReader does not have required field \"Resource\"");
    }

    #[test]
    fn test_rejects_unknown_runner_and_negative_limit() {
        let runner = Arc::new(FakeRunner::new());
        assert!(reader(json!({"Resource": "nope://x"}), runner.clone()).is_err());
        let err = reader(json!({"Resource": "fake://x", "ReaderConfig": {"MaxItems": -1}}), runner).unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.Map.ItemReader.ReaderConfig field \"MaxItems\" value \"-1\" must be a non-negative integer"
        );
    }

    #[test]
    fn test_reads_and_limits_items() {
        let runner = Arc::new(FakeRunner::new());
        runner.script(
            "fake://list",
            Script::Succeed {
                polls: 1,
                output: json!([1, 2, 3, 4]),
            },
        );
        let r = reader(json!({"Resource": "fake://list", "ReaderConfig": {"MaxItems": 3}}), runner.clone()).unwrap();

        let handle = r.start(&json!({}), &json!({"bucket": "b"})).unwrap();
        assert_eq!(runner.started()[0].1, json!({"bucket": "b"}));
        assert_eq!(r.poll(&handle, &json!({})).unwrap(), None);
        assert_eq!(r.poll(&handle, &json!({})).unwrap(), Some(vec![json!(1), json!(2), json!(3)]));
    }

    #[test]
    fn test_limit_from_path() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://list", Script::Succeed { polls: 0, output: json!(["a", "b"]) });
        let r = reader(
            json!({"Resource": "fake://list", "ReaderConfig": {"MaxItemsPath": "$.max"}}),
            runner,
        )
        .unwrap();
        let handle = r.start(&json!({}), &json!({})).unwrap();
        assert_eq!(r.poll(&handle, &json!({"max": 1})).unwrap(), Some(vec![json!("a")]));
    }

    #[test]
    fn test_non_array_output_fails() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://list", Script::Succeed { polls: 0, output: json!({"not": "array"}) });
        let r = reader(json!({"Resource": "fake://list"}), runner).unwrap();
        let handle = r.start(&json!({}), &json!({})).unwrap();
        let err = r.poll(&handle, &json!({})).unwrap_err();
        assert_eq!(err.error, codes::ITEM_READER_FAILED);
    }
}
