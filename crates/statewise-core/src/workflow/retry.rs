//! Retry/Catch error recovery for failable states (Task, Map, Parallel).
//!
//! On failure a state hands its [`ExecutionError`] to [`RetryCatch::recover`]:
//! - a matching **Retrier** with attempts left arms a backoff deadline and the
//!   state is restarted once it elapses;
//! - otherwise a matching **Catcher** merges the error into the state input at
//!   its `ResultPath` and redirects to its `Next`;
//! - otherwise the error is recorded on the state, failing it.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{codes, DefinitionError, ExecutionError};

use super::definition::Fields;
use super::reference_path::ReferencePath;

/// Scratch key holding the number of retries performed so far.
pub const RETRY_COUNT_KEY: &str = "RetryCount";
/// Scratch key holding the deadline of a pending retry.
pub const RETRY_AT_KEY: &str = "RetryAt";

fn default_interval_seconds() -> f64 {
    1.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn matches(error_equals: &[String], error: &ExecutionError) -> bool {
    error_equals
        .iter()
        .any(|code| code == codes::ALL || *code == error.error)
}

fn parse_error_equals(fields: &Fields<'_>, last: bool) -> Result<Vec<String>, DefinitionError> {
    let error_equals = fields
        .string_list("ErrorEquals")?
        .ok_or_else(|| fields.missing("ErrorEquals"))?;
    if error_equals.is_empty() {
        return Err(fields.error("field \"ErrorEquals\" must not be empty"));
    }
    if error_equals.iter().any(|code| code == codes::ALL) {
        if error_equals.len() > 1 {
            return Err(fields.error(format!("\"{}\" must appear alone in \"ErrorEquals\"", codes::ALL)));
        }
        if !last {
            return Err(fields.error(format!("\"{}\" must appear in the last entry", codes::ALL)));
        }
    }
    Ok(error_equals)
}

// ---------------------------------------------------------------------------
// Retrier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Retrier {
    pub error_equals: Vec<String>,
    pub interval_seconds: f64,
    pub max_attempts: u32,
    pub backoff_rate: f64,
    pub max_delay_seconds: Option<f64>,
}

impl Retrier {
    pub fn parse(fields: &Fields<'_>, last: bool) -> Result<Self, DefinitionError> {
        let error_equals = parse_error_equals(fields, last)?;

        let interval_seconds = fields.f64("IntervalSeconds")?.unwrap_or_else(default_interval_seconds);
        if interval_seconds <= 0.0 {
            return Err(fields.invalid("IntervalSeconds", &Value::from(interval_seconds), "must be positive"));
        }
        let max_attempts = fields
            .non_negative("MaxAttempts")?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or_else(default_max_attempts);
        let backoff_rate = fields.f64("BackoffRate")?.unwrap_or_else(default_backoff_rate);
        if backoff_rate < 1.0 {
            return Err(fields.invalid("BackoffRate", &Value::from(backoff_rate), "must be at least 1.0"));
        }
        let max_delay_seconds = fields.f64("MaxDelaySeconds")?;
        if let Some(max) = max_delay_seconds.filter(|max| *max <= 0.0) {
            return Err(fields.invalid("MaxDelaySeconds", &Value::from(max), "must be positive"));
        }

        Ok(Self {
            error_equals,
            interval_seconds,
            max_attempts,
            backoff_rate,
            max_delay_seconds,
        })
    }

    pub fn matches(&self, error: &ExecutionError) -> bool {
        matches(&self.error_equals, error)
    }

    /// Seconds to wait before retry `attempt` (1-based):
    /// `IntervalSeconds × BackoffRate^(attempt-1)`, capped by `MaxDelaySeconds`.
    pub fn sleep_duration(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.interval_seconds * self.backoff_rate.powi(exponent);
        match self.max_delay_seconds {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Catcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Catcher {
    pub error_equals: Vec<String>,
    pub next: String,
    /// `None` when `ResultPath` is JSON null: the error is discarded.
    pub result_path: Option<ReferencePath>,
}

impl Catcher {
    pub fn parse(fields: &Fields<'_>, last: bool) -> Result<Self, DefinitionError> {
        let error_equals = parse_error_equals(fields, last)?;
        let next = fields.required_str("Next")?.to_string();
        let result_path = match fields.get("ResultPath") {
            Some(Value::Null) => None,
            Some(_) => fields.reference_path("ResultPath")?,
            None => Some(ReferencePath::identity()),
        };
        Ok(Self {
            error_equals,
            next,
            result_path,
        })
    }

    pub fn matches(&self, error: &ExecutionError) -> bool {
        matches(&self.error_equals, error)
    }
}

// ---------------------------------------------------------------------------
// RetryCatch
// ---------------------------------------------------------------------------

/// Outcome of offering an error to the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Restart the state once the deadline passes.
    Retry(DateTime<Utc>),
    /// Redirected to a catcher's `Next`; the state finishes normally.
    Caught,
    /// Unrecovered: `State.Error` is set and the state finishes as failed.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryCatch {
    pub retry: Vec<Retrier>,
    pub catch: Vec<Catcher>,
}

impl RetryCatch {
    /// Read the `Retry` and `Catch` lists of a state.
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        let retry = parse_list(fields, "Retry", Retrier::parse)?;
        let catch = parse_list(fields, "Catch", Catcher::parse)?;
        Ok(Self { retry, catch })
    }

    /// States a catcher may transition to.
    pub fn catch_targets(&self) -> impl Iterator<Item = &str> {
        self.catch.iter().map(|c| c.next.as_str())
    }

    /// Apply the policy to `error` raised by the current state of `ctx`.
    pub fn recover(&self, ctx: &mut Context, error: &ExecutionError, now: DateTime<Utc>) -> Recovery {
        let state = ctx.state_name().unwrap_or_default().to_string();

        if let Some(retrier) = self.retry.iter().find(|r| r.matches(error)) {
            let attempts = ctx
                .state
                .scratch(RETRY_COUNT_KEY)
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            if attempts < retrier.max_attempts {
                let attempt = attempts + 1;
                let delay = retrier.sleep_duration(attempt);
                let at = now + TimeDelta::milliseconds((delay * 1000.0).round() as i64);
                ctx.state.set_scratch(RETRY_COUNT_KEY, Value::from(attempt));
                ctx.state.set_scratch_time(RETRY_AT_KEY, at);
                tracing::warn!(
                    %state,
                    error = %error,
                    attempt,
                    max_attempts = retrier.max_attempts,
                    delay_secs = delay,
                    "state failed, retrying"
                );
                return Recovery::Retry(at);
            }
        }

        if let Some(catcher) = self.catch.iter().find(|c| c.matches(error)) {
            let input = ctx.state.input.clone();
            let output = match &catcher.result_path {
                Some(path) => path.set(&input, error.to_output()),
                None => Ok(input),
            };
            match output {
                Ok(output) => {
                    tracing::warn!(%state, error = %error, next = %catcher.next, "state failed, caught");
                    ctx.state.output = Some(output);
                    ctx.state.next_state = Some(catcher.next.clone());
                    return Recovery::Caught;
                }
                Err(path_error) => {
                    Self::fail(ctx, &path_error);
                    return Recovery::Failed;
                }
            }
        }

        Self::fail(ctx, error);
        Recovery::Failed
    }

    /// Record an unrecovered error on the current state.
    pub fn fail(ctx: &mut Context, error: &ExecutionError) {
        tracing::warn!(state = ctx.state_name().unwrap_or_default(), error = %error, "state failed");
        ctx.state.output = Some(error.to_output());
        ctx.state.error = Some(error.error.clone());
        ctx.state.cause = error.cause.clone();
        ctx.state.next_state = None;
    }
}

fn parse_list<T>(
    fields: &Fields<'_>,
    field: &str,
    parse: fn(&Fields<'_>, bool) -> Result<T, DefinitionError>,
) -> Result<Vec<T>, DefinitionError> {
    let Some(items) = fields.array(field)? else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let scoped = Fields::new(format!("{}.{field}[{i}]", fields.scope()), item)?;
            parse(&scoped, i + 1 == items.len())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
