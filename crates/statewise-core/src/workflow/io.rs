//! The shared input/output pipeline:
//! `InputPath → Parameters → (work) → ResultSelector → ResultPath → OutputPath`.

use serde_json::{Map, Value};
use statewise_types::error::{DefinitionError, ExecutionError};

use super::definition::Fields;
use super::path::Path;
use super::reference_path::ReferencePath;
use super::template::PayloadTemplate;

/// A path field that may be JSON `null`.
#[derive(Debug, Clone, PartialEq)]
enum Nullable<T> {
    Null,
    Set(T),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputOutput {
    input_path: Nullable<Path>,
    parameters: Option<PayloadTemplate>,
    result_selector: Option<PayloadTemplate>,
    result_path: Nullable<ReferencePath>,
    output_path: Nullable<Path>,
}

impl Default for InputOutput {
    fn default() -> Self {
        Self {
            input_path: Nullable::Set(Path::identity()),
            parameters: None,
            result_selector: None,
            result_path: Nullable::Set(ReferencePath::identity()),
            output_path: Nullable::Set(Path::identity()),
        }
    }
}

impl InputOutput {
    /// Read the pipeline fields a state supports.
    ///
    /// `with_parameters` / `with_result` select whether the state accepts
    /// `Parameters` and `ResultSelector`/`ResultPath` at all (Wait and Choice
    /// only filter; Succeed and Fail are handled by their own states).
    pub fn parse(fields: &Fields<'_>, with_parameters: bool, with_result: bool) -> Result<Self, DefinitionError> {
        let input_path = match fields.get("InputPath") {
            Some(Value::Null) => Nullable::Null,
            Some(_) => Nullable::Set(fields.path("InputPath")?.unwrap_or_else(Path::identity)),
            None => Nullable::Set(Path::identity()),
        };
        let output_path = match fields.get("OutputPath") {
            Some(Value::Null) => Nullable::Null,
            Some(_) => Nullable::Set(fields.path("OutputPath")?.unwrap_or_else(Path::identity)),
            None => Nullable::Set(Path::identity()),
        };
        let parameters = if with_parameters {
            fields.template("Parameters")?
        } else {
            None
        };
        let (result_selector, result_path) = if with_result {
            let result_path = match fields.get("ResultPath") {
                Some(Value::Null) => Nullable::Null,
                Some(_) => Nullable::Set(
                    fields
                        .reference_path("ResultPath")?
                        .unwrap_or_else(ReferencePath::identity),
                ),
                None => Nullable::Set(ReferencePath::identity()),
            };
            (fields.template("ResultSelector")?, result_path)
        } else {
            (None, Nullable::Set(ReferencePath::identity()))
        };

        Ok(Self {
            input_path,
            parameters,
            result_selector,
            result_path,
            output_path,
        })
    }

    /// Apply `InputPath` then `Parameters` to the raw state input.
    pub fn process_input(&self, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
        let filtered = self.filter_input(context, input)?;
        match &self.parameters {
            Some(template) => template.value(context, &filtered),
            None => Ok(filtered),
        }
    }

    /// Apply `InputPath` only.
    pub fn filter_input(&self, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
        match &self.input_path {
            Nullable::Null => Ok(Value::Object(Map::new())),
            Nullable::Set(path) => path.value(context, input),
        }
    }

    /// Combine `result` with the raw state input and produce the state output.
    ///
    /// `ResultSelector` shapes the result, `ResultPath` places it into the
    /// raw input (null discards it), and `OutputPath` filters the combination.
    pub fn process_output(&self, context: &Value, raw_input: &Value, result: Value) -> Result<Value, ExecutionError> {
        let result = match &self.result_selector {
            Some(template) => template.value(context, &result)?,
            None => result,
        };
        let combined = match &self.result_path {
            Nullable::Null => raw_input.clone(),
            Nullable::Set(path) => path.set(raw_input, result)?,
        };
        self.filter_output(context, &combined)
    }

    /// Apply `OutputPath` only.
    pub fn filter_output(&self, context: &Value, value: &Value) -> Result<Value, ExecutionError> {
        match &self.output_path {
            Nullable::Null => Ok(Value::Object(Map::new())),
            Nullable::Set(path) => path.value(context, value),
        }
    }
}
