//! Container runner for `docker://` Task resources.
//!
//! Each start spawns `docker run --rm -i <image>` with the Task input written
//! to stdin. Stdout and stderr go to temp files so polling never blocks on a
//! pipe; `poll` is a `try_wait` on the tracked child. Workflow credentials
//! reach the container as the `_CREDENTIALS` environment variable, passed by
//! name so they never appear on the command line.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use dashmap::DashMap;
use serde_json::{json, Value};
use statewise_core::runner::Runner;
use statewise_types::config::DockerConfig;
use statewise_types::error::codes;
use statewise_types::runner::{RunnerError, RunnerHandle, RunnerPoll};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Name under which this runner registers and tags its handles.
pub const RUNNER_NAME: &str = "docker";

/// Environment variable carrying the evaluated Task credentials.
pub const CREDENTIALS_ENV: &str = "_CREDENTIALS";

/// Longest stderr suffix reported as a failure cause.
const MAX_CAUSE_BYTES: usize = 2048;

/// A started container and its captured output.
struct Tracked {
    child: Child,
    stdout: NamedTempFile,
    stderr: NamedTempFile,
}

pub struct DockerRunner {
    config: DockerConfig,
    running: DashMap<String, Tracked>,
}

impl DockerRunner {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            running: DashMap::new(),
        }
    }

    /// Number of containers this runner is still tracking.
    pub fn tracked(&self) -> usize {
        self.running.len()
    }

    /// Arguments for `docker run`, image last.
    fn run_args(&self, image: &str, name: &str, with_credentials: bool) -> Vec<String> {
        let mut args: Vec<String> = ["run", "--rm", "-i", "--name", name]
            .into_iter()
            .map(str::to_string)
            .collect();
        if let Some(network) = &self.config.network {
            args.extend(["--network".to_string(), network.clone()]);
        }
        if self.config.pull {
            args.extend(["--pull".to_string(), "always".to_string()]);
        }
        for (key, value) in &self.config.env {
            args.extend(["-e".to_string(), format!("{key}={value}")]);
        }
        if with_credentials {
            args.extend(["-e".to_string(), CREDENTIALS_ENV.to_string()]);
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push(image.to_string());
        args
    }

    fn finish(&self, id: &str, tracked: Tracked, status: std::process::ExitStatus) -> RunnerPoll {
        let stdout = std::fs::read_to_string(tracked.stdout.path()).unwrap_or_default();
        let stderr = std::fs::read_to_string(tracked.stderr.path()).unwrap_or_default();

        if status.success() {
            tracing::debug!(handle = id, "container succeeded");
            return RunnerPoll::Succeeded(parse_output(&stdout));
        }

        let tail = stderr_tail(&stderr);
        tracing::warn!(handle = id, %status, "container failed");
        RunnerPoll::Failed {
            error: codes::TASK_FAILED.to_string(),
            cause: Some(if tail.is_empty() {
                format!("container exited with {status}")
            } else {
                tail
            }),
        }
    }
}

/// Container stdout as JSON, or as a plain string when it is not JSON.
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let mut start = trimmed.len().saturating_sub(MAX_CAUSE_BYTES);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

impl Runner for DockerRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    fn start(&self, resource: &str, input: &Value, credentials: Option<&Value>) -> Result<RunnerHandle, RunnerError> {
        let image = resource
            .strip_prefix("docker://")
            .filter(|image| !image.is_empty())
            .ok_or_else(|| RunnerError::StartFailed {
                resource: resource.to_string(),
                reason: "expected docker://<image>".to_string(),
            })?;

        let id = Uuid::now_v7().to_string();
        let name = format!("statewise-{id}");
        let stdout = NamedTempFile::new()?;
        let stderr = NamedTempFile::new()?;

        let mut command = Command::new(&self.config.binary);
        command
            .args(self.run_args(image, &name, credentials.is_some()))
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout.reopen()?))
            .stderr(Stdio::from(stderr.reopen()?));
        if let Some(credentials) = credentials {
            command.env(CREDENTIALS_ENV, credentials.to_string());
        }

        let mut child = command.spawn().map_err(|e| RunnerError::StartFailed {
            resource: resource.to_string(),
            reason: format!("failed to spawn {}: {e}", self.config.binary),
        })?;

        // Feed stdin off-thread so a container that reads slowly cannot block the caller.
        if let Some(mut stdin) = child.stdin.take() {
            let payload = input.to_string();
            std::thread::spawn(move || {
                if let Err(e) = stdin.write_all(payload.as_bytes()) {
                    tracing::debug!("container closed stdin early: {e}");
                }
            });
        }

        tracing::info!(handle = %id, image, "started container");
        self.running.insert(id.clone(), Tracked { child, stdout, stderr });

        Ok(RunnerHandle {
            id,
            runner: RUNNER_NAME.to_string(),
            data: json!({"image": image, "container": name}),
        })
    }

    fn poll(&self, handle: &RunnerHandle) -> Result<RunnerPoll, RunnerError> {
        let status = {
            let mut entry = self
                .running
                .get_mut(&handle.id)
                .ok_or_else(|| RunnerError::UnknownHandle(handle.id.clone()))?;
            entry.child.try_wait()?
        };

        let Some(status) = status else {
            return Ok(RunnerPoll::Running);
        };
        let Some((_, tracked)) = self.running.remove(&handle.id) else {
            return Err(RunnerError::UnknownHandle(handle.id.clone()));
        };
        Ok(self.finish(&handle.id, tracked, status))
    }

    fn cleanup(&self, handle: &RunnerHandle) -> Result<(), RunnerError> {
        let Some((_, mut tracked)) = self.running.remove(&handle.id) else {
            return Ok(());
        };
        if tracked.child.try_wait()?.is_some() {
            return Ok(());
        }

        tracing::info!(handle = %handle.id, "stopping container");
        tracked.child.kill()?;
        tracked.child.wait()?;

        // Killing the client does not stop the container itself.
        if let Some(container) = handle.data.get("container").and_then(Value::as_str) {
            let mut rm = Command::new(&self.config.binary);
            rm.args(["rm", "-f", container])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            std::thread::spawn(move || {
                if let Err(e) = rm.status() {
                    tracing::debug!("failed to remove container: {e}");
                }
            });
        }
        Ok(())
    }
}
