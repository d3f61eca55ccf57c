//! Application state shared by the CLI commands.
//!
//! Pins the core executor and checkpoint manager to the concrete infra
//! implementations (file checkpoints, built-in runners).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use statewise_core::runner::RunnerRegistry;
use statewise_core::workflow::executor::Executor;
use statewise_core::workflow::{RunOptions, Workflow};
use statewise_infra::checkpoint::FileContextRepository;
use statewise_infra::config::{checkpoint_dir, default_data_dir, load_engine_config};
use statewise_infra::runner::default_registry;
use statewise_types::config::EngineConfig;
use statewise_types::credentials::Credentials;

pub type ConcreteExecutor = Executor<FileContextRepository>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub registry: RunnerRegistry,
    pub repo: FileContextRepository,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and wire the runners.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = default_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let registry = default_registry(&config);
        let repo = FileContextRepository::new(checkpoint_dir(&config, &data_dir));

        tracing::debug!(
            data_dir = %data_dir.display(),
            checkpoints = %repo.dir().display(),
            runners = ?registry.list_schemes(),
            "initialized app state"
        );

        Ok(Self {
            data_dir,
            config,
            registry,
            repo,
        })
    }

    /// Run options from config; `timeout_secs` overrides the configured default.
    pub fn run_options(&self, timeout_secs: Option<u64>) -> RunOptions {
        let options = RunOptions::from_config(&self.config);
        match timeout_secs {
            Some(secs) => options.with_timeout(Some(Duration::from_secs(secs))),
            None => options,
        }
    }

    pub fn executor(&self, timeout_secs: Option<u64>) -> ConcreteExecutor {
        Executor::new(self.repo.clone(), self.run_options(timeout_secs))
    }

    pub fn load_workflow(&self, path: &Path, credentials: Credentials) -> anyhow::Result<Workflow> {
        let workflow = Workflow::load(path, &self.registry)
            .with_context(|| format!("Invalid workflow {}", path.display()))?;
        Ok(workflow.with_credentials(credentials))
    }
}
