//! Amazon States Language interpreter.
//!
//! This module contains the whole engine:
//! - `definition` -- JSON/YAML loading, field access, file discovery
//! - `path`, `reference_path`, `template`, `intrinsics` -- data addressing and shaping
//! - `choice_rule` -- Choice state rule evaluation
//! - `io`, `retry` -- input/output processing and Retry/Catch policies shared by states
//! - `item_reader`, `item_batcher` -- Map item sources and batching
//! - `states` -- the eight state types and the non-blocking step driver
//! - `fan_out` -- child executions for Map and Parallel
//! - `machine`, `engine` -- state graphs, the `Workflow` handle and blocking run loop
//! - `graph` -- Graphviz export and reachability
//! - `checkpoint`, `executor` -- durable checkpointing and resume

pub mod checkpoint;
pub mod choice_rule;
pub mod definition;
pub mod engine;
pub mod executor;
mod fan_out;
pub mod graph;
pub mod intrinsics;
pub mod io;
pub mod item_batcher;
pub mod item_reader;
pub mod machine;
pub mod path;
pub mod reference_path;
pub mod retry;
pub mod states;
pub mod template;

pub use definition::WorkflowError;
pub use engine::{RunOptions, RunOutcome, Workflow};
pub use machine::StateMachine;
pub use states::{Step, Tick};
