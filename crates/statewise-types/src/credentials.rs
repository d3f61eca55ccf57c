//! Workflow credentials.
//!
//! Secrets are held as [`SecretString`] and only exposed when a Task's
//! `Credentials` template is evaluated for a runner start.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

/// Named secrets available to Task `Credentials` templates.
#[derive(Clone, Default)]
pub struct Credentials {
    entries: BTreeMap<String, SecretString>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Non-string values are stored as their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let entries = map
            .iter()
            .map(|(key, val)| {
                let secret = match val {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), SecretString::from(secret))
            })
            .collect();
        Some(Self { entries })
    }

    pub fn insert(&mut self, key: impl Into<String>, secret: impl Into<String>) {
        self.entries
            .insert(key.into(), SecretString::from(secret.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Expose all secrets as a JSON object.
    pub fn expose(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.expose_secret().to_string())))
            .collect();
        Value::Object(map)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_and_expose() {
        let creds = Credentials::from_json(&json!({"token": "s3cr3t", "port": 5432})).unwrap();
        assert_eq!(creds.expose(), json!({"token": "s3cr3t", "port": "5432"}));
        assert_eq!(creds.keys().collect::<Vec<_>>(), vec!["port", "token"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(Credentials::from_json(&json!(["a"])).is_none());
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let mut creds = Credentials::new();
        creds.insert("password", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"), "got: {debug}");
    }
}
