// Environment variable layers

use crate::{ConfigError, Layer, Result};
use serde_json::Value;
use std::env;
use std::path::Path;

/// Builds settings layers from prefixed environment variables.
///
/// `TRELLIS__TANGLED__APP__DEBUG=true` maps to `tangled.app.debug`: the
/// prefix and its separator are stripped, `__` becomes `.` and the key is
/// lowercased.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Setting key for an environment variable name, if it carries the prefix
    pub fn setting_key(&self, var: &str) -> Option<String> {
        let rest = var.strip_prefix(&self.prefix)?.strip_prefix("__")?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.split("__").collect::<Vec<_>>().join(".").to_lowercase())
    }

    /// Layer from the process environment
    pub fn load(&self) -> Layer {
        self.layer_from(format!("env:{}", self.prefix), env::vars())
    }

    /// Layer from a `.env` file, without touching the process environment
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<Layer> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        let mut vars = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::LoadError(e.to_string()))?;
            vars.push((key, value));
        }
        Ok(self.layer_from(format!("dotenv:{}", path.display()), vars))
    }

    fn layer_from(&self, name: String, vars: impl IntoIterator<Item = (String, String)>) -> Layer {
        vars.into_iter()
            .filter_map(|(var, value)| self.setting_key(&var).map(|key| (key, value)))
            .fold(Layer::new(name), |layer, (key, value)| {
                layer.set(key, Value::String(value))
            })
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("TRELLIS")
    }
}
