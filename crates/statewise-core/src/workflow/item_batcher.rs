//! Map `ItemBatcher`: groups items into batch objects `{"Items": [...], ..BatchInput}`.

use serde_json::{Map, Value};
use statewise_types::error::{DefinitionError, ExecutionError};

use super::definition::Fields;
use super::reference_path::ReferencePath;
use super::template::PayloadTemplate;

#[derive(Debug, Clone, PartialEq)]
enum Limit {
    Unset,
    Static(u64),
    Path(ReferencePath),
}

impl Limit {
    fn parse(fields: &Fields<'_>, field: &str, path_field: &str) -> Result<Self, DefinitionError> {
        if fields.has(field) && fields.has(path_field) {
            return Err(fields.error(format!("must not specify both \"{field}\" and \"{path_field}\"")));
        }
        if let Some(n) = fields.positive(field)? {
            return Ok(Self::Static(n));
        }
        Ok(fields
            .reference_path(path_field)?
            .map_or(Self::Unset, Self::Path))
    }

    fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    fn resolve(&self, scope: &str, path_field: &str, state_input: &Value) -> Result<Option<u64>, ExecutionError> {
        match self {
            Self::Unset => Ok(None),
            Self::Static(n) => Ok(Some(*n)),
            Self::Path(path) => {
                let value = path.value(state_input)?;
                match value.as_i64() {
                    Some(n) if n > 0 => Ok(Some(n as u64)),
                    _ => Err(ExecutionError::runtime(format!(
                        "{scope} field \"{path_field}\" value \"{value}\" must be a positive integer"
                    ))),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemBatcher {
    scope: String,
    batch_input: Option<PayloadTemplate>,
    max_items: Limit,
    max_bytes: Limit,
}

impl ItemBatcher {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        let max_items = Limit::parse(fields, "MaxItemsPerBatch", "MaxItemsPerBatchPath")?;
        let max_bytes = Limit::parse(fields, "MaxInputBytesPerBatch", "MaxInputBytesPerBatchPath")?;
        if !max_items.is_set() && !max_bytes.is_set() {
            return Err(fields.error(
                "must have one of \"MaxItemsPerBatch\", \"MaxItemsPerBatchPath\", \
                 \"MaxInputBytesPerBatch\", \"MaxInputBytesPerBatchPath\"",
            ));
        }
        Ok(Self {
            scope: fields.scope().to_string(),
            batch_input: fields.template("BatchInput")?,
            max_items,
            max_bytes,
        })
    }

    /// Split `items` into ordered batches.
    ///
    /// Path-valued limits and `BatchInput` are resolved against the Map
    /// state's input. Batches are filled greedily; only the last may be short.
    pub fn value(&self, context: &Value, items: &[Value], state_input: &Value) -> Result<Vec<Value>, ExecutionError> {
        let max_items = self
            .max_items
            .resolve(&self.scope, "MaxItemsPerBatchPath", state_input)?
            .map(|n| n as usize);
        let max_bytes = self
            .max_bytes
            .resolve(&self.scope, "MaxInputBytesPerBatchPath", state_input)?
            .map(|n| n as usize);

        let base = match &self.batch_input {
            None => Map::new(),
            Some(template) => match template.value(context, state_input)? {
                Value::Object(map) => map,
                other => {
                    return Err(ExecutionError::runtime(format!(
                        "{} field \"BatchInput\" must produce an object, got {other}",
                        self.scope
                    )))
                }
            },
        };
        let empty_size = batch_object(&base, Vec::new()).to_string().len();

        let mut batches = Vec::new();
        let mut current: Vec<Value> = Vec::new();
        let mut current_size = empty_size;
        for (index, item) in items.iter().enumerate() {
            let item_size = item.to_string().len();
            let added = if current.is_empty() { item_size } else { item_size + 1 };

            let full_by_count = max_items.is_some_and(|max| current.len() >= max);
            let full_by_bytes = max_bytes.is_some_and(|max| current_size + added > max);
            if !current.is_empty() && (full_by_count || full_by_bytes) {
                batches.push(batch_object(&base, std::mem::take(&mut current)));
                current_size = empty_size;
            }

            current_size += if current.is_empty() { item_size } else { item_size + 1 };
            if let Some(max) = max_bytes.filter(|max| current_size > *max) {
                return Err(ExecutionError::runtime(format!(
                    "{} item {index} does not fit in MaxInputBytesPerBatch ({max})",
                    self.scope
                )));
            }
            current.push(item.clone());
        }
        if !current.is_empty() {
            batches.push(batch_object(&base, current));
        }
        Ok(batches)
    }
}

fn batch_object(base: &Map<String, Value>, items: Vec<Value>) -> Value {
    let mut batch = base.clone();
    batch.insert("Items".to_string(), Value::Array(items));
    Value::Object(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batcher(def: Value) -> Result<ItemBatcher, DefinitionError> {
        ItemBatcher::parse(&Fields::new("States.Map.ItemBatcher", &def)?)
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_requires_a_limit() {
        let err = batcher(json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.Map.ItemBatcher must have one of \"MaxItemsPerBatch\", \"MaxItemsPerBatchPath\", \
             \"MaxInputBytesPerBatch\", \"MaxInputBytesPerBatchPath\""
        );
    }

    #[test]
    fn test_rejects_value_and_path() {
        let err = batcher(json!({"MaxItemsPerBatch": 2, "MaxItemsPerBatchPath": "$.n"})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.Map.ItemBatcher must not specify both \"MaxItemsPerBatch\" and \"MaxItemsPerBatchPath\""
        );
        assert!(batcher(json!({"MaxInputBytesPerBatch": 10, "MaxInputBytesPerBatchPath": "$.n"})).is_err());
    }

    #[test]
    fn test_rejects_non_positive_static() {
        let err = batcher(json!({"MaxItemsPerBatch": 0})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.Map.ItemBatcher field \"MaxItemsPerBatch\" value \"0\" must be a positive integer"
        );
        assert!(batcher(json!({"MaxInputBytesPerBatch": -5})).is_err());
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    #[test]
    fn test_batches_by_item_count() {
        let b = batcher(json!({"MaxItemsPerBatch": 2})).unwrap();
        let items = vec![json!("a"), json!("b"), json!("c"), json!("d"), json!("e")];
        let batches = b.value(&json!({}), &items, &json!({})).unwrap();
        assert_eq!(
            Value::Array(batches),
            json!([{"Items": ["a", "b"]}, {"Items": ["c", "d"]}, {"Items": ["e"]}])
        );
    }

    #[test]
    fn test_batch_input_is_merged() {
        let b = batcher(json!({"MaxItemsPerBatch": 3, "BatchInput": {"job.$": "$.job", "fixed": 1}})).unwrap();
        let batches = b
            .value(&json!({}), &[json!(1), json!(2)], &json!({"job": "x"}))
            .unwrap();
        assert_eq!(batches, vec![json!({"job": "x", "fixed": 1, "Items": [1, 2]})]);
    }

    #[test]
    fn test_path_limit_resolved_at_runtime() {
        let b = batcher(json!({"MaxItemsPerBatchPath": "$.size"})).unwrap();
        let items = [json!(1), json!(2), json!(3)];
        let batches = b.value(&json!({}), &items, &json!({"size": 1})).unwrap();
        assert_eq!(batches.len(), 3);

        let err = b.value(&json!({}), &items, &json!({"size": 0})).unwrap_err();
        assert_eq!(err.error, "States.Runtime");
        assert_eq!(
            err.cause.as_deref(),
            Some("States.Map.ItemBatcher field \"MaxItemsPerBatchPath\" value \"0\" must be a positive integer")
        );
    }

    #[test]
    fn test_batches_by_bytes() {
        // {"Items":[]} is 12 bytes; each "aa" item adds 4 (plus a comma after the first).
        let b = batcher(json!({"MaxInputBytesPerBatch": 21})).unwrap();
        let items = vec![json!("aa"), json!("bb"), json!("cc")];
        let batches = b.value(&json!({}), &items, &json!({})).unwrap();
        assert_eq!(batches, vec![json!({"Items": ["aa", "bb"]}), json!({"Items": ["cc"]})]);
        for batch in &batches {
            assert!(batch.to_string().len() <= 21);
        }
    }

    #[test]
    fn test_item_too_large_for_bytes_limit() {
        let b = batcher(json!({"MaxInputBytesPerBatch": 13})).unwrap();
        let err = b.value(&json!({}), &[json!("too long")], &json!({})).unwrap_err();
        assert_eq!(err.error, "States.Runtime");
    }

    #[test]
    fn test_empty_items() {
        let b = batcher(json!({"MaxItemsPerBatch": 2})).unwrap();
        assert!(b.value(&json!({}), &[], &json!({})).unwrap().is_empty());
    }
}
