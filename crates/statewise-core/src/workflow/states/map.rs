use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use statewise_types::context::Context;
use statewise_types::error::{codes, DefinitionError, ExecutionError};
use statewise_types::runner::RunnerHandle;

use super::{complete, Behavior, Progress, Tick};
use crate::runner::RunnerRegistry;
use crate::workflow::definition::{Fields, Transition};
use crate::workflow::fan_out::{self, FanOut, Policy};
use crate::workflow::io::InputOutput;
use crate::workflow::item_batcher::ItemBatcher;
use crate::workflow::item_reader::ItemReader;
use crate::workflow::machine::StateMachine;
use crate::workflow::reference_path::ReferencePath;
use crate::workflow::retry::RetryCatch;
use crate::workflow::template::PayloadTemplate;

pub(crate) const ITEMS_KEY: &str = "ItemProcessorContext";
const READER_HANDLE_KEY: &str = "ItemReaderHandle";

/// Runs its `ItemProcessor` once per item (or batch) of the input.
#[derive(Debug)]
pub struct Map {
    pub(crate) processor: StateMachine,
    items_path: ReferencePath,
    item_selector: Option<PayloadTemplate>,
    batcher: Option<ItemBatcher>,
    reader: Option<ItemReader>,
    max_concurrency: Option<usize>,
    tolerated_failure_count: Option<u64>,
    tolerated_failure_percentage: Option<f64>,
    pub(crate) io: InputOutput,
    pub(crate) retry_catch: RetryCatch,
    pub(crate) transition: Transition,
}

impl Map {
    pub fn parse(fields: &Fields<'_>, registry: &RunnerRegistry) -> Result<Self, DefinitionError> {
        // `Iterator` is the older name of `ItemProcessor`.
        let processor_def = fields
            .get("ItemProcessor")
            .or_else(|| fields.get("Iterator"))
            .ok_or_else(|| fields.missing("ItemProcessor"))?;
        let processor = StateMachine::parse(
            &format!("{}.ItemProcessor", fields.scope()),
            processor_def,
            registry,
        )?;

        fields.exclusive("ItemSelector", "Parameters")?;
        let item_selector = match fields.template("ItemSelector")? {
            Some(template) => Some(template),
            None => fields.template("Parameters")?,
        };

        let batcher = fields
            .nested("ItemBatcher")?
            .map(|f| ItemBatcher::parse(&f))
            .transpose()?;
        let reader = fields
            .nested("ItemReader")?
            .map(|f| ItemReader::parse(&f, registry))
            .transpose()?;

        let tolerated_failure_percentage = fields.f64("ToleratedFailurePercentage")?;
        if let Some(pct) = tolerated_failure_percentage {
            if !(0.0..=100.0).contains(&pct) {
                return Err(fields.invalid(
                    "ToleratedFailurePercentage",
                    &json!(pct),
                    "must be between 0 and 100",
                ));
            }
        }

        Ok(Self {
            processor,
            items_path: fields
                .reference_path("ItemsPath")?
                .unwrap_or_else(ReferencePath::identity),
            item_selector,
            batcher,
            reader,
            max_concurrency: fields
                .non_negative("MaxConcurrency")?
                .filter(|n| *n > 0)
                .map(|n| n as usize),
            tolerated_failure_count: fields.non_negative("ToleratedFailureCount")?,
            tolerated_failure_percentage,
            io: InputOutput::parse(fields, false, true)?,
            retry_catch: RetryCatch::parse(fields)?,
            transition: fields.transition()?,
        })
    }

    fn policy(&self) -> Policy {
        Policy {
            max_concurrency: self.max_concurrency,
            fail_fast: false,
        }
    }

    fn has_tolerance(&self) -> bool {
        self.tolerated_failure_count.is_some() || self.tolerated_failure_percentage.is_some()
    }

    /// Whether the failures among `children` are within the configured tolerance.
    fn tolerated(&self, children: &[Context]) -> bool {
        let failed = children.iter().filter(|c| c.failed()).count();
        let total = children.len();
        if failed == 0 || total == 0 {
            return true;
        }
        if !self.has_tolerance() {
            return false;
        }
        let count_ok = self
            .tolerated_failure_count
            .is_none_or(|limit| (failed as u64) < limit);
        let pct_ok = self
            .tolerated_failure_percentage
            .is_none_or(|pct| pct >= 100.0 || (100.0 * failed as f64 / total as f64) < pct);
        count_ok && pct_ok
    }

    /// Selector and batcher applied to the raw item list, then one child per input.
    fn seed(&self, ctx: &mut Context, context: &Value, input: &Value, items: Vec<Value>) -> Result<(), ExecutionError> {
        let selected = match &self.item_selector {
            None => items,
            Some(template) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let mut scoped = context.clone();
                    if let Value::Object(map) = &mut scoped {
                        map.insert("Map".to_string(), json!({"Item": {"Index": index, "Value": item}}));
                    }
                    template.value(&scoped, input)
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let inputs = match &self.batcher {
            Some(batcher) => batcher.value(context, &selected, input)?,
            None => selected,
        };

        tracing::debug!(
            state = ctx.state_name().unwrap_or_default(),
            children = inputs.len(),
            "starting map iterations"
        );
        fan_out::seed(ctx, ITEMS_KEY, inputs, |_| Some(&self.processor));
        Ok(())
    }

    fn reader_handle(ctx: &Context) -> Result<Option<RunnerHandle>, ExecutionError> {
        ctx.state
            .scratch(READER_HANDLE_KEY)
            .cloned()
            .map(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| ExecutionError::runtime(format!("invalid item reader handle: {e}")))
            })
            .transpose()
    }
}

impl Behavior for Map {
    fn start(&self, ctx: &mut Context, _tick: &Tick<'_>) -> Result<(), ExecutionError> {
        self.release(ctx);
        ctx.state.take_scratch(ITEMS_KEY);

        let context = ctx.to_value();
        let input = self.io.filter_input(&context, &ctx.state.input)?;

        if let Some(reader) = &self.reader {
            let handle = reader.start(&context, &input)?;
            let stored = serde_json::to_value(&handle)
                .map_err(|e| ExecutionError::runtime(format!("invalid item reader handle: {e}")))?;
            ctx.state.set_scratch(READER_HANDLE_KEY, stored);
            return Ok(());
        }

        let items = match self.items_path.value(&input)? {
            Value::Array(items) => items,
            other => {
                return Err(ExecutionError::runtime(format!(
                    "ItemsPath [{}] must select an array, got {other}",
                    self.items_path.as_str()
                )))
            }
        };
        self.seed(ctx, &context, &input, items)
    }

    fn poll(&self, ctx: &mut Context, tick: &Tick<'_>) -> Result<Progress, ExecutionError> {
        if let Some(handle) = Self::reader_handle(ctx)? {
            let reader = self
                .reader
                .as_ref()
                .ok_or_else(|| ExecutionError::runtime("item reader handle without an ItemReader"))?;
            let context = ctx.to_value();
            let input = self.io.filter_input(&context, &ctx.state.input)?;
            let polled = reader.poll(&handle, &input);
            if !matches!(polled, Ok(None)) {
                ctx.state.take_scratch(READER_HANDLE_KEY);
            }
            let Some(items) = polled? else {
                return Ok(Progress::Running);
            };
            self.seed(ctx, &context, &input, items)?;
        }

        match fan_out::step(ctx, ITEMS_KEY, |_| Some(&self.processor), self.policy(), tick)? {
            FanOut::Running => return Ok(Progress::Running),
            FanOut::BlockedUntil(at) => return Ok(Progress::BlockedUntil(at)),
            FanOut::Complete => {}
        }

        let children = fan_out::load(ctx, ITEMS_KEY)?;
        if !self.tolerated(&children) {
            if self.has_tolerance() {
                let failed = children.iter().filter(|c| c.failed()).count();
                return Err(ExecutionError::new(
                    codes::EXCEED_TOLERATED_FAILURE_THRESHOLD,
                    Some(format!("{failed} of {} iterations failed", children.len())),
                ));
            }
            return Err(fan_out::first_failure(&children));
        }

        let context = ctx.to_value();
        let raw = ctx.state.input.clone();
        let result = Value::Array(fan_out::outputs(&children));
        let output = self.io.process_output(&context, &raw, result)?;
        Ok(complete(ctx, output, &self.transition))
    }

    fn retry_catch(&self) -> Option<&RetryCatch> {
        Some(&self.retry_catch)
    }

    fn blocked_until(&self, ctx: &Context) -> Option<DateTime<Utc>> {
        fan_out::wait_until(ctx, ITEMS_KEY, |_| Some(&self.processor))
    }

    fn release(&self, ctx: &mut Context) {
        fan_out::release(ctx, ITEMS_KEY, |_| Some(&self.processor));
        if let (Some(reader), Ok(Some(handle))) = (&self.reader, Self::reader_handle(ctx)) {
            reader.cleanup(&handle);
        }
        ctx.state.take_scratch(READER_HANDLE_KEY);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runner::testing::{FakeRunner, Script};
    use crate::workflow::states::testing::{advance, context, epoch, run_state, state, state_with};
    use crate::workflow::states::{State, Step};
    use chrono::TimeDelta;

    fn map(extra: Value) -> State {
        let mut def = json!({
            "Type": "Map",
            "ItemProcessor": {
                "StartAt": "Echo",
                "States": {"Echo": {"Type": "Pass", "End": true}}
            },
            "End": true
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut def, extra) {
            base.extend(extra);
        }
        state(def)
    }

    fn failing_processor() -> Value {
        json!({
            "StartAt": "Check",
            "States": {
                "Check": {
                    "Type": "Choice",
                    "Choices": [{"Variable": "$.ok", "BooleanEquals": true, "Next": "Done"}],
                    "Default": "Boom"
                },
                "Done": {"Type": "Succeed"},
                "Boom": {"Type": "Fail", "Error": "States.TaskFailed"}
            }
        })
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_requires_item_processor() {
        let def = json!({"Type": "Map", "End": true});
        let err = State::parse("M", "States.M".to_string(), &def, &RunnerRegistry::new()).unwrap_err();
        assert_eq!(err.to_string(), "States.M does not have required field \"ItemProcessor\"");
    }

    #[test]
    fn test_processor_next_must_stay_inside() {
        let def = json!({
            "Type": "Map",
            "ItemProcessor": {"StartAt": "A", "States": {"A": {"Type": "Pass", "Next": "Outside"}}},
            "End": true
        });
        let err = State::parse("M", "States.M".to_string(), &def, &RunnerRegistry::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "States.A field \"Next\" value \"Outside\" is not found in \"States\""
        );
    }

    #[test]
    fn test_rejects_bad_limits() {
        let registry = RunnerRegistry::new();
        let base = |extra: Value| {
            let mut def = json!({
                "Type": "Map",
                "ItemProcessor": {"StartAt": "A", "States": {"A": {"Type": "Succeed"}}},
                "End": true
            });
            if let (Value::Object(b), Value::Object(e)) = (&mut def, extra) {
                b.extend(e);
            }
            def
        };
        for extra in [
            json!({"MaxConcurrency": -1}),
            json!({"ToleratedFailureCount": -2}),
            json!({"ToleratedFailurePercentage": 101}),
            json!({"ItemSelector": {}, "Parameters": {}}),
        ] {
            assert!(State::parse("M", "States.M".to_string(), &base(extra.clone()), &registry).is_err(), "{extra}");
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    #[test]
    fn test_outputs_in_item_order() {
        let s = map(json!({"ItemsPath": "$.items"}));
        let ctx = run_state(&s, json!({"items": [{"foo": "bar"}, 2]}));
        assert!(!ctx.failed());
        assert_eq!(ctx.output(), Some(&json!([{"foo": "bar"}, 2])));
    }

    #[test]
    fn test_children_share_execution_id() {
        let s = map(json!({"ItemsPath": "$.items"}));
        let ctx = run_state(&s, json!({"items": [1, 2, 3]}));
        let children = ctx.state_history[0].scratch(ITEMS_KEY).unwrap().as_array().unwrap().clone();
        assert_eq!(children.len(), 3);
        for child in children {
            assert_eq!(child["Execution"]["Id"], json!(ctx.execution.id));
        }
    }

    #[test]
    fn test_empty_items_produce_empty_array() {
        let ctx = run_state(&map(json!({})), json!([]));
        assert_eq!(ctx.output(), Some(&json!([])));
    }

    #[test]
    fn test_items_path_must_be_array() {
        let ctx = run_state(&map(json!({"ItemsPath": "$.items"})), json!({"items": 3}));
        assert!(ctx.failed());
        assert_eq!(ctx.state.error.as_deref(), Some("States.Runtime"));
    }

    #[test]
    fn test_item_selector_sees_index_and_value() {
        let s = map(json!({
            "ItemsPath": "$.items",
            "ItemSelector": {"index.$": "$$.Map.Item.Index", "value.$": "$$.Map.Item.Value", "tag.$": "$.tag"}
        }));
        let ctx = run_state(&s, json!({"items": ["a", "b"], "tag": "t"}));
        assert_eq!(
            ctx.output(),
            Some(&json!([
                {"index": 0, "value": "a", "tag": "t"},
                {"index": 1, "value": "b", "tag": "t"}
            ]))
        );
    }

    #[test]
    fn test_batches_become_children() {
        let s = map(json!({"ItemBatcher": {"MaxItemsPerBatch": 2}}));
        let ctx = run_state(&s, json!(["a", "b", "c"]));
        assert_eq!(
            ctx.output(),
            Some(&json!([{"Items": ["a", "b"]}, {"Items": ["c"]}]))
        );
    }

    #[test]
    fn test_first_child_error_without_tolerance() {
        let s = state(json!({"Type": "Map", "ItemProcessor": failing_processor(), "End": true}));
        let ctx = run_state(&s, json!([{"ok": true}, {"ok": false}]));
        assert!(ctx.failed());
        assert_eq!(ctx.output(), Some(&json!({"Error": "States.TaskFailed"})));
    }

    #[test]
    fn test_tolerated_failures() {
        let def = |extra: Value| {
            let mut def = json!({"Type": "Map", "ItemProcessor": failing_processor(), "End": true});
            if let (Value::Object(b), Value::Object(e)) = (&mut def, extra) {
                b.extend(e);
            }
            state(def)
        };
        let input = json!([{"ok": true}, {"ok": false}, {"ok": true}, {"ok": true}]);

        let ctx = run_state(&def(json!({"ToleratedFailureCount": 2})), input.clone());
        assert!(!ctx.failed());

        let ctx = run_state(&def(json!({"ToleratedFailureCount": 1})), input.clone());
        assert_eq!(ctx.state.error.as_deref(), Some("States.ExceedToleratedFailureThreshold"));

        let ctx = run_state(&def(json!({"ToleratedFailurePercentage": 30})), input.clone());
        assert!(!ctx.failed());

        let ctx = run_state(&def(json!({"ToleratedFailurePercentage": 25})), input.clone());
        assert!(ctx.failed());

        let ctx = run_state(&def(json!({"ToleratedFailurePercentage": 100, "ToleratedFailureCount": 5})), input);
        assert!(!ctx.failed());
    }

    #[test]
    fn test_max_concurrency_limits_running_children() {
        let def = json!({
            "Type": "Map",
            "MaxConcurrency": 1,
            "ItemProcessor": {
                "StartAt": "W",
                "States": {"W": {"Type": "Wait", "Seconds": 5, "End": true}}
            },
            "End": true
        });
        let s = state(def);
        let mut ctx = context(json!([1, 2, 3]));
        let mut now = epoch();
        let mut ticks = 0;
        loop {
            let step = advance(&s, &mut ctx, now);
            if step == Step::Done {
                break;
            }
            if let Some(children) = ctx.state.scratch(ITEMS_KEY).and_then(Value::as_array) {
                let running = children
                    .iter()
                    .filter(|c| c["Execution"].get("StartTime").is_some() && c["Execution"].get("EndTime").is_none())
                    .count();
                assert!(running <= 1);
            }
            now += TimeDelta::seconds(5);
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(ctx.output(), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_item_reader_supplies_items() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://list", Script::Succeed { polls: 1, output: json!([10, 20, 30]) });
        let registry = RunnerRegistry::new().with("fake", runner.clone());
        let s = state_with(
            json!({
                "Type": "Map",
                "ItemReader": {"Resource": "fake://list", "ReaderConfig": {"MaxItems": 2}},
                "ItemProcessor": {"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}},
                "End": true
            }),
            &registry,
        );
        let mut ctx = context(json!({"bucket": "b"}));
        assert_eq!(advance(&s, &mut ctx, epoch()), Step::Pending);
        assert_eq!(advance(&s, &mut ctx, epoch()), Step::Done);
        assert_eq!(ctx.output(), Some(&json!([10, 20])));
        assert_eq!(runner.started()[0].1, json!({"bucket": "b"}));
    }

    #[test]
    fn test_release_cleans_up_running_items() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://slow", Script::Succeed { polls: 100, output: json!(1) });
        runner.script("fake://slow", Script::Succeed { polls: 100, output: json!(2) });
        let registry = RunnerRegistry::new().with("fake", runner.clone());
        let s = state_with(
            json!({
                "Type": "Map",
                "ItemProcessor": {"StartAt": "T", "States": {"T": {"Type": "Task", "Resource": "fake://slow", "End": true}}},
                "End": true
            }),
            &registry,
        );
        let mut ctx = context(json!([1, 2]));
        assert_eq!(advance(&s, &mut ctx, epoch()), Step::Pending);
        assert_eq!(runner.running(), 2);

        s.release(&mut ctx);
        assert_eq!(runner.running(), 0);
        assert_eq!(runner.cleaned(), vec!["fake-1".to_string(), "fake-2".to_string()]);
    }

    #[test]
    fn test_release_cleans_up_pending_item_reader() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://list", Script::Succeed { polls: 100, output: json!([1]) });
        let registry = RunnerRegistry::new().with("fake", runner.clone());
        let s = state_with(
            json!({
                "Type": "Map",
                "ItemReader": {"Resource": "fake://list"},
                "ItemProcessor": {"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}},
                "End": true
            }),
            &registry,
        );
        let mut ctx = context(json!({}));
        assert_eq!(advance(&s, &mut ctx, epoch()), Step::Pending);

        s.release(&mut ctx);
        assert_eq!(runner.running(), 0);
        assert_eq!(runner.cleaned(), vec!["fake-1".to_string()]);
        assert!(ctx.state.scratch(READER_HANDLE_KEY).is_none());
    }

    #[test]
    fn test_retry_restarts_failed_item_reader_once() {
        let runner = Arc::new(FakeRunner::new());
        runner.script("fake://list", Script::Succeed { polls: 0, output: json!("not a list") });
        runner.script("fake://list", Script::Succeed { polls: 0, output: json!([7]) });
        let registry = RunnerRegistry::new().with("fake", runner.clone());
        let s = state_with(
            json!({
                "Type": "Map",
                "ItemReader": {"Resource": "fake://list"},
                "ItemProcessor": {"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}},
                "Retry": [{"ErrorEquals": ["States.ALL"], "IntervalSeconds": 1}],
                "End": true
            }),
            &registry,
        );
        let ctx = run_state(&s, json!({}));
        assert_eq!(ctx.output(), Some(&json!([7])));
        assert_eq!(runner.running(), 0);
        assert_eq!(runner.cleaned(), vec!["fake-1".to_string(), "fake-2".to_string()]);
    }

    #[test]
    fn test_blocked_children_report_earliest_deadline() {
        let def = json!({
            "Type": "Map",
            "ItemProcessor": {
                "StartAt": "W",
                "States": {"W": {"Type": "Wait", "SecondsPath": "$.s", "End": true}}
            },
            "End": true
        });
        let s = state(def);
        let mut ctx = context(json!([{"s": 30}, {"s": 10}]));
        let t0 = epoch();
        let expected = t0 + TimeDelta::seconds(10);
        assert_eq!(advance(&s, &mut ctx, t0), Step::BlockedUntil(expected));
        assert_eq!(s.wait_until(&ctx), Some(expected));
    }
}
