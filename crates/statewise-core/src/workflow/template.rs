//! Payload templates (`Parameters`, `ResultSelector`, `ItemSelector`, ...).
//!
//! Keys ending in `.$` take their value from a path or an intrinsic call;
//! everything else is copied through. Templates are compiled at load time
//! and applied recursively through nested objects and arrays.

use serde_json::{Map, Value};
use statewise_types::error::{DefinitionError, ExecutionError};

use super::intrinsics::IntrinsicCall;
use super::path::Path;

const DYNAMIC_SUFFIX: &str = ".$";

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Object(Vec<(String, Node)>),
    Array(Vec<Node>),
    Path(Path),
    Intrinsic(IntrinsicCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTemplate {
    root: Node,
}

impl PayloadTemplate {
    pub fn parse(template: &Value) -> Result<Self, DefinitionError> {
        Ok(Self {
            root: compile(template)?,
        })
    }

    /// Expand the template against the context (`$$`) and input (`$`).
    pub fn value(&self, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
        expand(&self.root, context, input)
    }
}

fn compile(value: &Value) -> Result<Node, DefinitionError> {
    match value {
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, child) in map {
                match key.strip_suffix(DYNAMIC_SUFFIX) {
                    Some(name) => {
                        let expression = child.as_str().ok_or_else(|| DefinitionError::InvalidPath {
                            path: child.to_string(),
                            reason: format!("value of \"{key}\" must be a string"),
                        })?;
                        let node = if IntrinsicCall::looks_like(expression) {
                            Node::Intrinsic(IntrinsicCall::parse(expression)?)
                        } else {
                            Node::Path(Path::parse(expression)?)
                        };
                        entries.push((name.to_string(), node));
                    }
                    None => entries.push((key.clone(), compile(child)?)),
                }
            }
            Ok(Node::Object(entries))
        }
        Value::Array(items) => Ok(Node::Array(
            items.iter().map(compile).collect::<Result<_, _>>()?,
        )),
        other => Ok(Node::Literal(other.clone())),
    }
}

fn expand(node: &Node, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Path(path) => path.value(context, input),
        Node::Intrinsic(call) => call.evaluate(context, input),
        Node::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| expand(item, context, input))
                .collect::<Result<_, _>>()?,
        )),
        Node::Object(entries) => {
            let mut out = Map::new();
            for (key, child) in entries {
                out.insert(key.clone(), expand(child, context, input)?);
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(template: Value, context: Value, input: Value) -> Result<Value, ExecutionError> {
        PayloadTemplate::parse(&template)
            .unwrap()
            .value(&context, &input)
    }

    #[test]
    fn test_static_values_pass_through() {
        let template = json!({"a": 1, "b": [true, null], "c": {"d": "e"}});
        assert_eq!(apply(template.clone(), json!({}), json!({})).unwrap(), template);
    }

    #[test]
    fn test_dynamic_keys_are_evaluated() {
        let out = apply(
            json!({"foo.$": "$.bar", "id.$": "$$.Execution.Id", "static": "$.bar"}),
            json!({"Execution": {"Id": "exec-1"}}),
            json!({"bar": "baz"}),
        )
        .unwrap();
        assert_eq!(out, json!({"foo": "baz", "id": "exec-1", "static": "$.bar"}));
    }

    #[test]
    fn test_nested_and_intrinsic() {
        let out = apply(
            json!({"outer": {"count.$": "States.ArrayLength($.items)"}, "list": [{"first.$": "$.items[0]"}]}),
            json!({}),
            json!({"items": ["x", "y"]}),
        )
        .unwrap();
        assert_eq!(out, json!({"outer": {"count": 2}, "list": [{"first": "x"}]}));
    }

    #[test]
    fn test_missing_path_is_runtime_error() {
        let err = apply(json!({"foo.$": "$.missing"}), json!({}), json!({})).unwrap_err();
        assert_eq!(err.error, "States.Runtime");
    }

    #[test]
    fn test_invalid_templates_fail_to_parse() {
        assert!(PayloadTemplate::parse(&json!({"foo.$": 1})).is_err());
        assert!(PayloadTemplate::parse(&json!({"foo.$": "bar"})).is_err());
        assert!(PayloadTemplate::parse(&json!({"foo.$": "States.Bogus()"})).is_err());
    }
}
