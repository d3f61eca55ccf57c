//! Built-in task runners.

pub mod docker;

use std::sync::Arc;

use statewise_core::runner::RunnerRegistry;
use statewise_types::config::EngineConfig;

pub use docker::DockerRunner;

/// Registry with every built-in runner, configured from `config`.
pub fn default_registry(config: &EngineConfig) -> RunnerRegistry {
    RunnerRegistry::new().with(docker::RUNNER_NAME, Arc::new(DockerRunner::new(config.docker.clone())))
}
