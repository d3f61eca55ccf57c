use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::{complete, Behavior, Progress, Tick};
use crate::workflow::definition::{Fields, Transition};
use crate::workflow::io::InputOutput;
use crate::workflow::path::Path;

const WAIT_UNTIL_KEY: &str = "WaitUntil";

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Seconds(u64),
    SecondsPath(Path),
    Timestamp(DateTime<Utc>),
    TimestampPath(Path),
}

/// Delays the execution for a fixed duration or until a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    target: Target,
    pub(crate) io: InputOutput,
    pub(crate) transition: Transition,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl Wait {
    pub fn parse(fields: &Fields<'_>) -> Result<Self, DefinitionError> {
        const TARGETS: [&str; 4] = ["Seconds", "SecondsPath", "Timestamp", "TimestampPath"];
        let present: Vec<&str> = TARGETS.into_iter().filter(|f| fields.has(f)).collect();
        let target = match present.as_slice() {
            ["Seconds"] => Target::Seconds(
                fields
                    .non_negative("Seconds")?
                    .ok_or_else(|| fields.missing("Seconds"))?,
            ),
            ["SecondsPath"] => Target::SecondsPath(
                fields
                    .path("SecondsPath")?
                    .ok_or_else(|| fields.missing("SecondsPath"))?,
            ),
            ["Timestamp"] => {
                let raw = fields.required_str("Timestamp")?;
                Target::Timestamp(parse_timestamp(raw).ok_or_else(|| {
                    fields.invalid("Timestamp", &Value::String(raw.to_string()), "is not a valid RFC 3339 timestamp")
                })?)
            }
            ["TimestampPath"] => Target::TimestampPath(
                fields
                    .path("TimestampPath")?
                    .ok_or_else(|| fields.missing("TimestampPath"))?,
            ),
            _ => {
                return Err(fields.error(
                    "must have exactly one of \"Seconds\", \"SecondsPath\", \"Timestamp\", \"TimestampPath\"",
                ))
            }
        };

        Ok(Self {
            target,
            io: InputOutput::parse(fields, false, false)?,
            transition: fields.transition()?,
        })
    }

    fn target_time(&self, context: &Value, input: &Value, now: DateTime<Utc>) -> Result<DateTime<Utc>, ExecutionError> {
        match &self.target {
            Target::Seconds(seconds) => Ok(now + TimeDelta::seconds(*seconds as i64)),
            Target::Timestamp(at) => Ok(*at),
            Target::SecondsPath(path) => {
                let value = path.value(context, input)?;
                match value.as_i64() {
                    Some(seconds) if seconds >= 0 => Ok(now + TimeDelta::seconds(seconds)),
                    _ => Err(ExecutionError::runtime(format!(
                        "field \"SecondsPath\" value \"{value}\" must be a non-negative integer"
                    ))),
                }
            }
            Target::TimestampPath(path) => {
                let value = path.value(context, input)?;
                value.as_str().and_then(parse_timestamp).ok_or_else(|| {
                    ExecutionError::runtime(format!(
                        "field \"TimestampPath\" value \"{value}\" is not a valid RFC 3339 timestamp"
                    ))
                })
            }
        }
    }
}

impl Behavior for Wait {
    fn start(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<(), ExecutionError> {
        let context = ctx.to_value();
        let input = self.io.filter_input(&context, &ctx.state.input)?;
        let until = self.target_time(&context, &input, tick.now)?;
        ctx.state.set_scratch_time(WAIT_UNTIL_KEY, until);
        Ok(())
    }

    fn poll(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        if let Some(until) = ctx.state.scratch_time(WAIT_UNTIL_KEY) {
            if tick.now < until {
                return Ok(Progress::BlockedUntil(until));
            }
        }
        let context = ctx.to_value();
        let input = self.io.filter_input(&context, &ctx.state.input)?;
        let output = self.io.filter_output(&context, &input)?;
        Ok(complete(ctx, output, &self.transition))
    }

    fn blocked_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        ctx.state.scratch_time(WAIT_UNTIL_KEY)
    }
}
