//! Write-capable reference paths (`ResultPath`, `ItemsPath`, ...).
//!
//! A reference path is a [`Path`] restricted to a single location: no
//! wildcards, no filters, no `$$` root. `set` is copy-on-write: it returns a
//! new document and never touches the caller's value.

use serde_json::{Map, Value};
use statewise_types::error::{codes, DefinitionError, ExecutionError};

use super::path::{Path, Root, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePath {
    path: Path,
}

impl ReferencePath {
    pub fn parse(expression: &str) -> Result<Self, DefinitionError> {
        if expression.contains(['@', ',', ':', '?']) {
            return Err(DefinitionError::InvalidReferencePath(expression.to_string()));
        }
        let path = Path::parse(expression)?;
        if path.has_wildcard() || path.root() == Root::Context {
            return Err(DefinitionError::InvalidReferencePath(expression.to_string()));
        }
        Ok(Self { path })
    }

    pub fn identity() -> Self {
        Self {
            path: Path::identity(),
        }
    }

    pub fn as_str(&self) -> &str {
        self.path.as_str()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, input: &Value) -> Option<Value> {
        self.path.get(&Value::Null, input)
    }

    /// Read the addressed value; a missing value is a `States.Runtime` error.
    pub fn value(&self, input: &Value) -> Result<Value, ExecutionError> {
        self.path.value(&Value::Null, input)
    }

    /// Return a copy of `target` with `value` stored at this path.
    ///
    /// `$` merges an object into an object and otherwise replaces the whole
    /// document. Deeper paths create missing intermediate objects.
    pub fn set(&self, target: &Value, value: Value) -> Result<Value, ExecutionError> {
        let segments = self.path.segments();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(match (target, value) {
                (Value::Object(base), Value::Object(extra)) => {
                    let mut merged = base.clone();
                    merged.extend(extra);
                    Value::Object(merged)
                }
                (_, replacement) => replacement,
            });
        };

        let mut result = target.clone();
        let mut cursor = &mut result;
        for segment in parents {
            cursor = self.descend(cursor, segment)?;
        }
        self.assign(cursor, last, value)?;
        Ok(result)
    }

    fn descend<'a>(&self, cursor: &'a mut Value, segment: &Segment) -> Result<&'a mut Value, ExecutionError> {
        match segment {
            Segment::Field(name) => {
                if cursor.is_null() {
                    *cursor = Value::Object(Map::new());
                }
                let map = cursor.as_object_mut().ok_or_else(|| self.mismatch())?;
                let child = map
                    .entry(name.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if child.is_null() {
                    *child = Value::Object(Map::new());
                }
                Ok(child)
            }
            Segment::Index(index) => {
                let items = cursor.as_array_mut().ok_or_else(|| self.mismatch())?;
                let slot = array_slot(items.len(), *index).ok_or_else(|| self.mismatch())?;
                Ok(&mut items[slot])
            }
            Segment::Wildcard => Err(self.mismatch()),
        }
    }

    fn assign(&self, cursor: &mut Value, segment: &Segment, value: Value) -> Result<(), ExecutionError> {
        match segment {
            Segment::Field(name) => {
                if cursor.is_null() {
                    *cursor = Value::Object(Map::new());
                }
                let map = cursor.as_object_mut().ok_or_else(|| self.mismatch())?;
                map.insert(name.clone(), value);
                Ok(())
            }
            Segment::Index(index) => {
                let items = cursor.as_array_mut().ok_or_else(|| self.mismatch())?;
                let slot = array_slot(items.len(), *index).ok_or_else(|| self.mismatch())?;
                items[slot] = value;
                Ok(())
            }
            Segment::Wildcard => Err(self.mismatch()),
        }
    }

    fn mismatch(&self) -> ExecutionError {
        ExecutionError::new(
            codes::RESULT_PATH_MATCH_FAILURE,
            Some(format!(
                "Unable to apply ReferencePath {} to input",
                self.path.as_str()
            )),
        )
    }
}

fn array_slot(len: usize, index: i64) -> Option<usize> {
    let index = if index < 0 { len as i64 + index } else { index };
    usize::try_from(index).ok().filter(|i| *i < len)
}
