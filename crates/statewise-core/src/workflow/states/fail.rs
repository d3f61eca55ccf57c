use serde_json::{Map, Value};
use statewise_types::context::Context;
use statewise_types::error::{codes, DefinitionError, ExecutionError};

use super::{Behavior, Progress, Tick};
use crate::workflow::definition::Fields;
use crate::workflow::path::Path;

/// A static value or one read from the input at run time.
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Static(String),
    Path(Path),
}

impl Source {
    fn parse(fields: &Fields<'_>, field: &str, path_field: &str) -> Result<Option<Self>, DefinitionError> {
        fields.exclusive(field, path_field)?;
        if let Some(value) = fields.str(field)? {
            return Ok(Some(Self::Static(value.to_string())));
        }
        Ok(fields.path(path_field)?.map(Self::Path))
    }

    fn resolve(&self, context: &Value, input: &Value) -> Result<String, ExecutionError> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Path(path) => Ok(match path.value(context, input)? {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        }
    }
}

/// Ends the execution with an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Fail {
    error: Option<Source>,
    cause: Option<Source>,
}

impl Fail {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        Ok(Self {
            error: Source::parse(fields, "Error", "ErrorPath")?,
            cause: Source::parse(fields, "Cause", "CausePath")?,
        })
    }
}

impl Behavior for Fail {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let input = ctx.state.input.clone();
        let error = match &self.error {
            Some(source) => source.resolve(&context, &input)?,
            None => codes::FAIL.to_string(),
        };
        let cause = self
            .cause
            .as_ref()
            .map(|source| source.resolve(&context, &input))
            .transpose()?;

        let mut output = Map::new();
        output.insert("Error".to_string(), Value::String(error.clone()));
        if let Some(cause) = &cause {
            output.insert("Cause".to_string(), Value::String(cause.clone()));
        }
        ctx.state.output = Some(Value::Object(output));
        ctx.state.error = Some(error);
        ctx.state.cause = cause;
        ctx.state.next_state = None;
        Ok(())
    }

    fn poll(&self, _ctx: &mut Context, _tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        Ok(Progress::Complete)
    }
}

#[cfg(test)]
mod tests {
    use statewise_types::context::ExecutionStatus;

    use crate::runner::RunnerRegistry;
    use crate::workflow::states::testing::{run_state, state};
    use crate::workflow::states::State;
    use serde_json::json;

    #[test]
    fn test_static_error_and_cause() {
        let s = state(json!({"Type": "Fail", "Error": "FailStateError", "Cause": "No Matches!"}));
        let ctx = run_state(&s, json!({}));
        assert_eq!(ctx.status(), ExecutionStatus::Failure);
        assert_eq!(ctx.next_state(), None);
        assert_eq!(ctx.state.error.as_deref(), Some("FailStateError"));
        assert_eq!(ctx.state.cause.as_deref(), Some("No Matches!"));
        assert_eq!(ctx.output(), Some(&json!({"Error": "FailStateError", "Cause": "No Matches!"})));
    }

    #[test]
    fn test_error_and_cause_from_paths() {
        let s = state(json!({"Type": "Fail", "ErrorPath": "$.err", "CausePath": "$.detail"}));
        let ctx = run_state(&s, json!({"err": "Custom", "detail": {"code": 7}}));
        assert_eq!(ctx.state.error.as_deref(), Some("Custom"));
        assert_eq!(ctx.state.cause.as_deref(), Some("{\"code\":7}"));
    }

    #[test]
    fn test_default_error_code() {
        let ctx = run_state(&state(json!({"Type": "Fail"})), json!({}));
        assert_eq!(ctx.state.error.as_deref(), Some("States.Fail"));
        assert_eq!(ctx.output(), Some(&json!({"Error": "States.Fail"})));
    }

    #[test]
    fn test_error_and_error_path_are_exclusive() {
        let def = json!({"Type": "Fail", "Error": "A", "ErrorPath": "$.b"});
        let err = State::parse("F", "States.F".to_string(), &def, &RunnerRegistry::new()).unwrap_err();
        assert_eq!(err.to_string(), "States.F cannot have both \"Error\" and \"ErrorPath\"");
    }
}
