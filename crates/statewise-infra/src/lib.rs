//! Infrastructure layer for Statewise.
//!
//! Contains implementations of the ports defined in `statewise-core`: the
//! docker task runner, the file-backed checkpoint store, and the
//! `config.toml` loader.

pub mod checkpoint;
pub mod config;
pub mod runner;
