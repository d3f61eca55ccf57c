//! Driving child executions (Map items, Parallel branches) from a parent state.
//!
//! Children are plain [`Context`]s stored as a JSON array in the parent
//! state's scratch data under a per-type key, so a checkpoint of the parent
//! carries the whole tree. Each parent poll offers every child one
//! `run_nonblocking` in index order.

use chrono::{DateTime, Utc};
use serde_json::Value;
use statewise_types::context::Context;
use statewise_types::error::{codes, ExecutionError};

use super::machine::StateMachine;
use super::states::{Step, Tick};

/// Aggregate progress of all children after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FanOut {
    /// Every child has ended (or, fail-fast, one has failed).
    Complete,
    Running,
    /// Every running child is blocked; the earliest deadline.
    BlockedUntil(DateTime<Utc>),
}

/// How children are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Policy {
    /// Most children started-but-unfinished at once; `None` is unbounded.
    pub max_concurrency: Option<usize>,
    /// Stop as soon as any child fails.
    pub fail_fast: bool,
}

/// Create one child per input, positioned on its machine's start state.
pub(crate) fn seed<'m>(
    ctx: &mut Context,
    key: &str,
    inputs: Vec<Value>,
    machine_for: impl Fn(usize) -> Option<&'m StateMachine>,
) {
    let children: Vec<Context> = inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            let mut child = Context::child(ctx.execution.id, input);
            if let Some(machine) = machine_for(i) {
                machine.prepare(&mut child);
            }
            child
        })
        .collect();
    store(ctx, key, &children);
}

pub(crate) fn load(ctx: &Context, key: &str) -> Result<Vec<Context>, ExecutionError> {
    let Some(raw) = ctx.state.scratch(key) else {
        return Err(ExecutionError::runtime(format!("missing child contexts \"{key}\"")));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| ExecutionError::runtime(format!("invalid child contexts \"{key}\": {e}")))
}

fn store(ctx: &mut Context, key: &str, children: &[Context]) {
    let values = children.iter().map(Context::to_value).collect();
    ctx.state.set_scratch(key, Value::Array(values));
}

/// Give every eligible child one non-blocking run.
pub(crate) fn step<'m>(
    ctx: &mut Context,
    key: &str,
    machine_for: impl Fn(usize) -> Option<&'m StateMachine>,
    policy: Policy,
    tick: &Tick<'_>,
) -> Result<FanOut, ExecutionError> {
    let mut children = load(ctx, key)?;
    let mut running = children.iter().filter(|c| c.running()).count();
    let mut pending = false;
    let mut earliest: Option<DateTime<Utc>> = None;

    for (i, child) in children.iter_mut().enumerate() {
        if child.ended() {
            continue;
        }
        if !child.started() {
            if policy.max_concurrency.is_some_and(|max| running >= max) {
                continue;
            }
            running += 1;
        }

        let machine = machine_for(i)
            .ok_or_else(|| ExecutionError::runtime(format!("no state machine for child {i} of \"{key}\"")))?;
        let step = machine
            .run_nonblocking(child, tick)
            .map_err(|e| ExecutionError::runtime(e.to_string()))?;
        match step {
            Step::Done => running = running.saturating_sub(1),
            Step::Pending => pending = true,
            Step::BlockedUntil(at) => earliest = Some(earliest.map_or(at, |e| e.min(at))),
        }

        if policy.fail_fast && child.failed() {
            break;
        }
    }

    let all_ended = children.iter().all(Context::ended);
    let any_failed = children.iter().any(Context::failed);
    store(ctx, key, &children);

    Ok(if all_ended || (policy.fail_fast && any_failed) {
        FanOut::Complete
    } else if pending {
        FanOut::Running
    } else {
        earliest.map_or(FanOut::Running, FanOut::BlockedUntil)
    })
}

/// Clean up runner work held by every child that has not ended.
///
/// A missing child list is left alone. Released children stay in the list
/// so their progress remains visible in checkpoints.
pub(crate) fn release<'m>(
    ctx: &mut Context,
    key: &str,
    machine_for: impl Fn(usize) -> Option<&'m StateMachine>,
) {
    let Ok(mut children) = load(ctx, key) else {
        return;
    };
    let mut released = 0;
    for (i, child) in children.iter_mut().enumerate() {
        if child.ended() {
            continue;
        }
        if let Some(machine) = machine_for(i) {
            machine.release(child);
            released += 1;
        }
    }
    if released > 0 {
        tracing::debug!(key, released, "released unfinished children");
        store(ctx, key, &children);
    }
}

/// Child outputs in index order.
pub(crate) fn outputs(children: &[Context]) -> Vec<Value> {
    children
        .iter()
        .map(|c| c.output().cloned().unwrap_or(Value::Null))
        .collect()
}

/// The error recorded by the first failed child.
pub(crate) fn first_failure(children: &[Context]) -> ExecutionError {
    children
        .iter()
        .find(|c| c.failed())
        .map(|c| {
            c.output()
                .and_then(ExecutionError::from_output)
                .unwrap_or_else(|| {
                    ExecutionError::new(
                        c.state.error.clone().unwrap_or_else(|| codes::ERROR.to_string()),
                        c.state.cause.clone(),
                    )
                })
        })
        .unwrap_or_else(|| ExecutionError::new(codes::ERROR, None))
}

/// Earliest deadline any running child is waiting on.
pub(crate) fn wait_until<'m>(
    ctx: &Context,
    key: &str,
    machine_for: impl Fn(usize) -> Option<&'m StateMachine>,
) -> Option<DateTime<Utc>> {
    let children = load(ctx, key).ok()?;
    children
        .iter()
        .enumerate()
        .filter_map(|(i, child)| machine_for(i)?.wait_until(child))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::machine::testing::machine;
    use crate::workflow::states::testing::{context, epoch};
    use chrono::TimeDelta;
    use serde_json::json;
    use statewise_types::credentials::Credentials;

    const KEY: &str = "Children";

    fn waiter(seconds: u64) -> StateMachine {
        machine(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": seconds, "End": true}}
        }))
    }

    fn tick(now: DateTime<Utc>, credentials: &Credentials) -> Tick<'_> {
        Tick { now, credentials }
    }

    #[test]
    fn test_seed_shares_execution_id() {
        let m = waiter(1);
        let mut ctx = context(json!({}));
        seed(&mut ctx, KEY, vec![json!(1), json!(2)], |_| Some(&m));

        let children = load(&ctx, KEY).unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.execution.id == ctx.execution.id));
        assert_eq!(children[1].execution.input, json!(2));
        assert_eq!(children[1].state_name(), Some("W"));
    }

    #[test]
    fn test_concurrency_gate() {
        let m = waiter(10);
        let mut ctx = context(json!({}));
        seed(&mut ctx, KEY, vec![json!(0); 5], |_| Some(&m));
        let creds = Credentials::new();
        let policy = Policy { max_concurrency: Some(2), fail_fast: false };

        let t0 = epoch();
        let progress = step(&mut ctx, KEY, |_| Some(&m), policy, &tick(t0, &creds)).unwrap();
        assert_eq!(progress, FanOut::BlockedUntil(t0 + TimeDelta::seconds(10)));
        let children = load(&ctx, KEY).unwrap();
        assert_eq!(children.iter().filter(|c| c.running()).count(), 2);
        assert_eq!(children.iter().filter(|c| !c.started()).count(), 3);

        // The first two finish, freeing slots for the next two.
        let t1 = t0 + TimeDelta::seconds(10);
        step(&mut ctx, KEY, |_| Some(&m), policy, &tick(t1, &creds)).unwrap();
        let children = load(&ctx, KEY).unwrap();
        assert_eq!(children.iter().filter(|c| c.ended()).count(), 2);
        assert_eq!(children.iter().filter(|c| c.running()).count(), 2);

        let mut now = t1;
        loop {
            now += TimeDelta::seconds(10);
            let progress = step(&mut ctx, KEY, |_| Some(&m), policy, &tick(now, &creds)).unwrap();
            let children = load(&ctx, KEY).unwrap();
            assert!(children.iter().filter(|c| c.running()).count() <= 2);
            if progress == FanOut::Complete {
                break;
            }
        }
    }

    #[test]
    fn test_fail_fast_completes_on_first_failure() {
        let ok = waiter(60);
        let boom = machine(json!({"StartAt": "F", "States": {"F": {"Type": "Fail", "Error": "Boom"}}}));
        let mut ctx = context(json!({}));
        let pick = |i: usize| Some(if i == 0 { &ok } else { &boom });
        seed(&mut ctx, KEY, vec![json!({}), json!({})], pick);
        let creds = Credentials::new();

        let policy = Policy { max_concurrency: None, fail_fast: true };
        assert_eq!(step(&mut ctx, KEY, pick, policy, &tick(epoch(), &creds)).unwrap(), FanOut::Complete);
        let children = load(&ctx, KEY).unwrap();
        assert_eq!(first_failure(&children), ExecutionError::new("Boom", None));
        assert!(!children[0].ended());
    }

    #[test]
    fn test_outputs_in_index_order() {
        let m = machine(json!({"StartAt": "P", "States": {"P": {"Type": "Pass", "End": true}}}));
        let mut ctx = context(json!({}));
        seed(&mut ctx, KEY, vec![json!({"foo": "bar"}), json!(2)], |_| Some(&m));
        let creds = Credentials::new();
        let policy = Policy { max_concurrency: None, fail_fast: false };
        assert_eq!(step(&mut ctx, KEY, |_| Some(&m), policy, &tick(epoch(), &creds)).unwrap(), FanOut::Complete);
        assert_eq!(outputs(&load(&ctx, KEY).unwrap()), vec![json!({"foo": "bar"}), json!(2)]);
    }

    #[test]
    fn test_missing_children_is_runtime_error() {
        let ctx = context(json!({}));
        assert_eq!(load(&ctx, KEY).unwrap_err().error, codes::RUNTIME);
    }
}
