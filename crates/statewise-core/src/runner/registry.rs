//! Scheme-indexed runner registry.

use std::collections::HashMap;
use std::sync::Arc;

use statewise_types::runner::RunnerError;

use super::{resource_scheme, Runner};

/// Registry of available runners, indexed by URI scheme.
///
/// Shared read-only by every workflow loaded with it; Task and ItemReader
/// states resolve their runner once, at load time.
#[derive(Clone)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Register a runner for `scheme`, replacing any previous one.
    pub fn register(&mut self, scheme: impl Into<String>, runner: Arc<dyn Runner>) {
        self.runners.insert(scheme.into(), runner);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, scheme: impl Into<String>, runner: Arc<dyn Runner>) -> Self {
        self.register(scheme, runner);
        self
    }

    /// Look up a runner by registered name.
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(scheme).cloned()
    }

    /// Resolve the runner for a resource URI.
    pub fn for_resource(&self, resource: &str) -> Result<Arc<dyn Runner>, RunnerError> {
        resource_scheme(resource)
            .and_then(|scheme| self.get(scheme))
            .ok_or_else(|| RunnerError::UnknownResource(resource.to_string()))
    }

    /// List all registered schemes, sorted.
    pub fn list_schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("schemes", &self.list_schemes())
            .finish()
    }
}
