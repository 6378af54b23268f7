//! Config - Named stack configuration values
//!
//! Values are read once from the stack file (`Trellis.<stack>.yaml`) and the
//! `TRELLIS_CONFIG` environment variable, then passed explicitly to whatever
//! needs them. Keys are namespaced as `project:key`; bare keys are looked up
//! under the stack's project.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::resource::Value;

/// Environment variable holding a JSON object of config overrides
pub const CONFIG_ENV_VAR: &str = "TRELLIS_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration variable '{key}'")]
    Missing { key: String },

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid stack file: {0}")]
    Parse(String),

    #[error("Invalid TRELLIS_CONFIG value: {0}")]
    Env(String),
}

/// A sensitive string. Never shows its content through Debug or Display.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([secret])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[secret]")
    }
}

impl From<Secret> for Value {
    fn from(secret: Secret) -> Self {
        Value::Secret(Box::new(Value::String(secret.0)))
    }
}

/// A single config entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    pub value: String,
    pub secret: bool,
}

/// Raw YAML representation of a config entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Secret { secret: String },
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<RawValue> for ConfigValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Secret { secret } => ConfigValue {
                value: secret,
                secret: true,
            },
            RawValue::Bool(b) => ConfigValue {
                value: b.to_string(),
                secret: false,
            },
            RawValue::Int(n) => ConfigValue {
                value: n.to_string(),
                secret: false,
            },
            RawValue::Text(s) => ConfigValue {
                value: s,
                secret: false,
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StackFile {
    #[serde(default)]
    config: BTreeMap<String, RawValue>,
}

/// Configuration of one stack of a project
#[derive(Debug, Clone)]
pub struct StackConfig {
    project: String,
    stack: String,
    values: BTreeMap<String, ConfigValue>,
}

impl StackConfig {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            values: BTreeMap::new(),
        }
    }

    /// Conventional stack file name for a stack
    pub fn file_name(stack: &str) -> String {
        format!("Trellis.{}.yaml", stack)
    }

    /// Load from a stack file. A missing file yields an empty config.
    pub fn load(
        path: &Path,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(project, stack);
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.merge_yaml(&content)?;
        Ok(config)
    }

    /// Load from the stack file and apply `TRELLIS_CONFIG` overrides
    pub fn load_with_env(
        path: &Path,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load(path, project, stack)?;
        if let Ok(json) = std::env::var(CONFIG_ENV_VAR) {
            config.merge_env_json(&json)?;
        }
        Ok(config)
    }

    pub fn merge_yaml(&mut self, content: &str) -> Result<(), ConfigError> {
        let file: StackFile =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for (key, raw) in file.config {
            let key = self.full_key(&key);
            self.values.insert(key, raw.into());
        }
        Ok(())
    }

    /// Apply overrides from a JSON object of `key -> string`
    pub fn merge_env_json(&mut self, json: &str) -> Result<(), ConfigError> {
        let overrides: BTreeMap<String, String> =
            serde_json::from_str(json).map_err(|e| ConfigError::Env(e.to_string()))?;
        for (key, value) in overrides {
            let key = self.full_key(&key);
            // Overriding a secret keeps it secret
            let secret = self.values.get(&key).is_some_and(|v| v.secret);
            self.values.insert(key, ConfigValue { value, secret });
        }
        Ok(())
    }

    /// Serialize back to the stack file format
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let config = self
            .values
            .iter()
            .map(|(k, v)| {
                let raw = if v.secret {
                    RawValue::Secret {
                        secret: v.value.clone(),
                    }
                } else {
                    RawValue::Text(v.value.clone())
                };
                (k.clone(), raw)
            })
            .collect();
        serde_yaml::to_string(&StackFile { config }).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = self.full_key(key);
        self.values.insert(
            key,
            ConfigValue {
                value: value.into(),
                secret: false,
            },
        );
    }

    pub fn set_secret(&mut self, key: &str, value: impl Into<String>) {
        let key = self.full_key(key);
        self.values.insert(
            key,
            ConfigValue {
                value: value.into(),
                secret: true,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(&self.full_key(key))
    }

    pub fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .map(|v| v.value.clone())
            .ok_or_else(|| ConfigError::Missing {
                key: self.full_key(key),
            })
    }

    /// Like `require`, but the value is always treated as a secret
    pub fn require_secret(&self, key: &str) -> Result<Secret, ConfigError> {
        self.require(key).map(Secret::new)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }

    fn full_key(&self, key: &str) -> String {
        if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", self.project, key)
        }
    }
}
