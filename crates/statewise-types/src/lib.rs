//! Shared domain types for Statewise.
//!
//! This crate contains the types shared by the interpreter, the runners and
//! the CLI: the execution `Context`, definition/execution error types, runner
//! wire types, credentials and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, secrecy.

pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod runner;
