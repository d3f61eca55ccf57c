//! Engine configuration loader for Statewise.
//!
//! Reads `config.toml` from the data directory (`~/.statewise/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use statewise_types::config::EngineConfig;

/// Resolve the data directory.
///
/// Priority:
/// 1. `STATEWISE_DATA_DIR` environment variable
/// 2. `~/.statewise`
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STATEWISE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".statewise");
    }

    // Last resort: current directory
    PathBuf::from(".statewise")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Directory holding execution checkpoints.
pub fn checkpoint_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("executions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
poll_interval_ms = 200
default_timeout_secs = 600

[docker]
binary = "podman"
network = "host"
extra_args = ["--memory", "512m"]

[docker.env]
AWS_REGION = "eu-west-1"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_ms, 200);
        assert_eq!(config.max_poll_interval_ms, 30_000);
        assert_eq!(config.default_timeout_secs, Some(600));
        assert_eq!(config.docker.binary, "podman");
        assert_eq!(config.docker.network.as_deref(), Some("host"));
        assert_eq!(config.docker.extra_args, vec!["--memory", "512m"]);
        assert_eq!(config.docker.env["AWS_REGION"], "eu-west-1");
    }

    #[tokio::test]
    async fn test_load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_checkpoint_dir_defaults_under_data_dir() {
        let data_dir = PathBuf::from("/home/user/.statewise");
        let mut config = EngineConfig::default();
        assert_eq!(
            checkpoint_dir(&config, &data_dir),
            PathBuf::from("/home/user/.statewise/executions")
        );

        config.checkpoint_dir = Some(PathBuf::from("/var/lib/statewise"));
        assert_eq!(checkpoint_dir(&config, &data_dir), PathBuf::from("/var/lib/statewise"));
    }

    #[test]
    fn test_default_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("STATEWISE_DATA_DIR", "/tmp/test-statewise");
        }
        let dir = default_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-statewise"));
        unsafe {
            std::env::remove_var("STATEWISE_DATA_DIR");
        }
    }
}
