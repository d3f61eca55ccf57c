//! Workflow definition loading and structural field access.
//!
//! Definitions are ASL documents written as JSON (or YAML). This module turns
//! text into a JSON value, offers [`Fields`] -- a typed, scope-aware view over
//! one definition object used by every state constructor -- and provides
//! discovery of workflow files on disk.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use statewise_types::error::DefinitionError;
use thiserror::Error;

use super::path::Path as ValuePath;
use super::reference_path::ReferencePath;
use super::template::PayloadTemplate;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The definition failed structural validation.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A persisted context could not be read back.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// The context names a state the definition does not contain.
    #[error("unknown state \"{0}\"")]
    UnknownState(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse definition text. JSON is tried first, then YAML.
pub fn parse_definition_text(text: &str) -> Result<Value, DefinitionError> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml_ng::from_str::<Value>(text).map_err(|yaml_err| {
            DefinitionError::Parse(format!("not JSON ({json_err}) nor YAML ({yaml_err})"))
        }),
    }
}

/// Load definition text from a file.
pub fn load_definition_file(path: &Path) -> Result<Value, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_definition_text(&content)?)
}

/// Discover all workflow definition files under `base_dir`.
///
/// Scans for `.json`, `.yaml` and `.yml` files recursively. Files that do not
/// parse, or that lack `StartAt`/`States`, are skipped with a warning.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Value)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(dir: &Path, results: &mut Vec<(PathBuf, Value)>) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_definition = path
            .extension()
            .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml");
        if !is_definition {
            continue;
        }
        match load_definition_file(&path) {
            Ok(value) if value.get("StartAt").is_some() && value.get("States").is_some() => {
                results.push((path, value));
            }
            _ => tracing::warn!(?path, "skipping file that is not a workflow definition"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Where a state goes once it finishes successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(String),
    End,
}

impl Transition {
    pub fn next(&self) -> Option<&str> {
        match self {
            Self::Next(name) => Some(name),
            Self::End => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A typed view over one definition object.
///
/// Every getter reports errors against `scope`, a dotted location such as
/// `States.MapState.ItemBatcher`.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    scope: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(scope: impl Into<String>, value: &'a Value) -> Result<Self, DefinitionError> {
        let scope = scope.into();
        match value.as_object() {
            Some(map) => Ok(Self { scope, map }),
            None => Err(DefinitionError::Invalid {
                scope,
                message: "must be an object".to_string(),
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.map.contains_key(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.map.keys().map(String::as_str)
    }

    /// A nested object, scoped as `<scope>.<field>`.
    pub fn nested(&self, field: &str) -> Result<Option<Fields<'a>>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(value) => Fields::new(format!("{}.{field}", self.scope), value).map(Some),
        }
    }

    // -----------------------------------------------------------------------
    // Error builders
    // -----------------------------------------------------------------------

    pub fn missing(&self, field: &str) -> DefinitionError {
        DefinitionError::MissingField {
            scope: self.scope.clone(),
            field: field.to_string(),
        }
    }

    pub fn invalid(&self, field: &str, value: &Value, reason: impl Into<String>) -> DefinitionError {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        DefinitionError::InvalidField {
            scope: self.scope.clone(),
            field: field.to_string(),
            value,
            reason: reason.into(),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> DefinitionError {
        DefinitionError::Invalid {
            scope: self.scope.clone(),
            message: message.into(),
        }
    }

    /// Reject the definition when both `a` and `b` are present.
    pub fn exclusive(&self, a: &str, b: &str) -> Result<(), DefinitionError> {
        if self.has(a) && self.has(b) {
            return Err(self.error(format!("cannot have both \"{a}\" and \"{b}\"")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scalars
    // -----------------------------------------------------------------------

    pub fn str(&self, field: &str) -> Result<Option<&'a str>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.invalid(field, other, "must be a string")),
        }
    }

    pub fn required_str(&self, field: &str) -> Result<&'a str, DefinitionError> {
        self.str(field)?.ok_or_else(|| self.missing(field))
    }

    pub fn bool(&self, field: &str) -> Result<Option<bool>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.invalid(field, other, "must be a boolean")),
        }
    }

    pub fn i64(&self, field: &str) -> Result<Option<i64>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, value, "must be an integer")),
        }
    }

    /// An integer that must be strictly positive.
    pub fn positive(&self, field: &str) -> Result<Option<u64>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(value) => match value.as_i64() {
                Some(n) if n > 0 => Ok(Some(n as u64)),
                _ => Err(self.invalid(field, value, "must be a positive integer")),
            },
        }
    }

    /// An integer that must be zero or greater.
    pub fn non_negative(&self, field: &str) -> Result<Option<u64>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(value) => match value.as_i64() {
                Some(n) if n >= 0 => Ok(Some(n as u64)),
                _ => Err(self.invalid(field, value, "must be a non-negative integer")),
            },
        }
    }

    pub fn f64(&self, field: &str) -> Result<Option<f64>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, value, "must be a number")),
        }
    }

    pub fn array(&self, field: &str) -> Result<Option<&'a Vec<Value>>, DefinitionError> {
        match self.map.get(field) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(self.invalid(field, other, "must be an array")),
        }
    }

    pub fn string_list(&self, field: &str) -> Result<Option<Vec<String>>, DefinitionError> {
        let Some(items) = self.array(field)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(field, item, "must contain only strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    // -----------------------------------------------------------------------
    // Paths and templates
    // -----------------------------------------------------------------------

    pub fn path(&self, field: &str) -> Result<Option<ValuePath>, DefinitionError> {
        self.str(field)?.map(ValuePath::parse).transpose()
    }

    pub fn reference_path(&self, field: &str) -> Result<Option<ReferencePath>, DefinitionError> {
        self.str(field)?.map(ReferencePath::parse).transpose()
    }

    pub fn template(&self, field: &str) -> Result<Option<PayloadTemplate>, DefinitionError> {
        self.map.get(field).map(PayloadTemplate::parse).transpose()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Read `Next` / `End`; exactly one must be present.
    pub fn transition(&self) -> Result<Transition, DefinitionError> {
        let next = self.str("Next")?;
        let end = self.bool("End")?.unwrap_or(false);
        match (next, end) {
            (Some(_), true) => Err(self.error("cannot have both \"Next\" and \"End\"")),
            (Some(next), false) => Ok(Transition::Next(next.to_string())),
            (None, true) => Ok(Transition::End),
            (None, false) => Err(self.error("must have either \"Next\" or \"End\": true")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
