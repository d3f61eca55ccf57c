//! Engine configuration types for Statewise.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls poll
//! pacing, checkpoint placement, and the built-in docker runner.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
///
/// Loaded from `~/.statewise/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between polls while a state is pending, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single sleep while a state is blocked until a known time.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Wall-clock limit for blocking runs (none = run until finished).
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Where execution checkpoints are stored (defaults to `<data_dir>/executions`).
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Bridge tracing spans to OpenTelemetry.
    #[serde(default)]
    pub log_otel: bool,

    #[serde(default)]
    pub docker: DockerConfig,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_poll_interval_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            default_timeout_secs: None,
            checkpoint_dir: None,
            log_otel: false,
            docker: DockerConfig::default(),
        }
    }
}

/// Settings for the `docker://` task runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Container CLI to invoke.
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    /// Optional `--network` value.
    #[serde(default)]
    pub network: Option<String>,

    /// Pass `--pull always` to every run.
    #[serde(default)]
    pub pull: bool,

    /// Extra arguments inserted before the image name.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Environment variables set in every container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            network: None,
            pull: false,
            extra_args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_poll_interval_ms, 30_000);
        assert!(config.default_timeout_secs.is_none());
        assert_eq!(config.docker.binary, "docker");
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
poll_interval_ms = 250
default_timeout_secs = 600
checkpoint_dir = "/var/lib/statewise"

[docker]
binary = "podman"
network = "host"
pull = true
extra_args = ["--memory", "512m"]

[docker.env]
AWS_REGION = "us-east-1"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_poll_interval_ms, 30_000);
        assert_eq!(config.default_timeout_secs, Some(600));
        assert_eq!(config.checkpoint_dir, Some(PathBuf::from("/var/lib/statewise")));
        assert_eq!(config.docker.binary, "podman");
        assert_eq!(config.docker.network.as_deref(), Some("host"));
        assert!(config.docker.pull);
        assert_eq!(config.docker.extra_args, vec!["--memory", "512m"]);
        assert_eq!(config.docker.env.get("AWS_REGION").map(String::as_str), Some("us-east-1"));
    }
}
