//! Task runner abstraction.
//!
//! A runner executes the actual work behind a Task (or ItemReader) `Resource`
//! and is only ever driven through a non-blocking start/poll contract:
//! - `Runner`: object-safe trait implemented by concrete backends (see
//!   `statewise-infra::runner`)
//! - `RunnerRegistry`: scheme-indexed lookup (`docker://image` → `docker`)

pub mod registry;

pub use registry::RunnerRegistry;

use serde_json::Value;
use statewise_types::runner::{RunnerError, RunnerHandle, RunnerPoll};

/// A backend that executes work for a resource URI.
///
/// Implementations must not block in `start` or `poll`: the interpreter calls
/// them from inside a single non-blocking `advance`.
pub trait Runner: Send + Sync {
    /// Registry name; also stored in every [`RunnerHandle`] it issues.
    fn name(&self) -> &str;

    /// Launch work for `resource` with a JSON `input`.
    ///
    /// `credentials` is the evaluated Task `Credentials` template, if any.
    fn start(
        &self,
        resource: &str,
        input: &Value,
        credentials: Option<&Value>,
    ) -> Result<RunnerHandle, RunnerError>;

    /// Check on previously started work.
    fn poll(&self, handle: &RunnerHandle) -> Result<RunnerPoll, RunnerError>;

    /// Release whatever the work still holds (process, temp files).
    fn cleanup(&self, _handle: &RunnerHandle) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Extract the scheme of a resource URI (`docker://busybox` → `docker`).
pub fn resource_scheme(resource: &str) -> Option<&str> {
    resource
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}
