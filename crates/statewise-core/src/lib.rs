//! Interpreter core and port definitions for Statewise.
//!
//! This crate holds the Amazon States Language engine and defines the
//! "ports" (runner and repository traits) that the infrastructure layer
//! implements. It depends only on `statewise-types` -- never on
//! `statewise-infra` or any process/filesystem backend.

pub mod repository;
pub mod runner;
pub mod workflow;
