//! Layered settings store for Trellis applications.
//!
//! Settings are a flat mapping of dotted keys to JSON values. A store starts
//! from the built-in defaults and then loads override layers in order; a
//! later layer shadows an earlier one key by key, and structured values are
//! replaced whole.
//!
//! ```
//! use trellis_config::{Layer, Settings};
//!
//! let mut settings = Settings::with_defaults().unwrap();
//! settings
//!     .load(Layer::from_ini_str("app.ini", "[app]\ntangled.app.csrf.enabled = true\n").unwrap())
//!     .unwrap();
//!
//! assert!(settings.app_bool("csrf.enabled").unwrap());
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod reference;
pub mod schema;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat, IniDocument};
pub use reference::ObjectRef;
pub use schema::{SettingKind, SettingSpec, APP_PREFIX, SCHEMA};

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// The layer a setting value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Built-in default
    Default,
    /// Named override layer
    Override(String),
}

/// A named set of raw setting values, not yet coerced
#[derive(Debug, Clone, Default)]
pub struct Layer {
    name: String,
    values: Map<String, Value>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a layer from an already flattened key/value map
    pub fn from_map(name: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
            sections: BTreeMap::new(),
        }
    }

    /// Parse INI text. The `[app]` section becomes the layer's values;
    /// every other section is kept raw.
    pub fn from_ini_str(name: impl Into<String>, text: &str) -> Result<Self> {
        let document = IniDocument::parse(text)?;
        Ok(Self::from_ini(name, document))
    }

    pub fn from_ini(name: impl Into<String>, mut document: IniDocument) -> Self {
        let values = document
            .take_section("app")
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        Self {
            name: name.into(),
            values,
            sections: document.into_sections(),
        }
    }

    /// Set a single value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    source: Source,
}

#[derive(Debug, Clone, Default)]
struct SettingsInner {
    values: BTreeMap<String, Entry>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// Typed, layered settings.
///
/// Cloning is cheap; clones share storage until one of them loads another
/// layer.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    inner: Arc<SettingsInner>,
}

impl Settings {
    /// A store with no values at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// A store holding the built-in defaults
    pub fn with_defaults() -> Result<Self> {
        let mut inner = SettingsInner::default();
        for spec in SCHEMA {
            if let Some(default) = spec.default {
                let value = schema::coerce(spec.key, spec.kind, Value::String(default.into()))?;
                inner.values.insert(
                    spec.key.to_string(),
                    Entry {
                        value,
                        source: Source::Default,
                    },
                );
            }
        }
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Load an override layer on top of the current values
    pub fn load(&mut self, layer: Layer) -> Result<()> {
        debug!(layer = %layer.name, keys = layer.values.len(), "Loading settings layer");

        // Coerce everything first so a bad value leaves the store untouched
        let mut coerced = Vec::with_capacity(layer.values.len());
        for (key, value) in layer.values {
            let value = match schema::kind_of(&key) {
                Some(kind) => schema::coerce(&key, kind, value)?,
                None => value,
            };
            coerced.push((key, value));
        }

        let inner = Arc::make_mut(&mut self.inner);
        for (key, value) in coerced {
            trace!(key = %key, "Setting overridden");
            inner.values.insert(
                key,
                Entry {
                    value,
                    source: Source::Override(layer.name.clone()),
                },
            );
        }
        inner.sections.extend(layer.sections);
        Ok(())
    }

    /// Raw value for `key`, or `default` when it is absent
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.value(key).cloned().unwrap_or(default)
    }

    /// Raw value for `key`. Explicit nulls count as absent.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.inner
            .values
            .get(key)
            .map(|e| &e.value)
            .filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Which layer supplied `key`
    pub fn source(&self, key: &str) -> Option<&Source> {
        self.inner.values.get(key).map(|e| &e.source)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.values.keys().map(String::as_str)
    }

    /// A raw non-`[app]` INI section
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.inner.sections.get(name)
    }

    fn required(&self, key: &str) -> Result<&Value> {
        self.value(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.required(key)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => schema::parse_bool(key, s),
            other => Err(ConfigError::InvalidBoolean {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.required(key)? {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::invalid(key, "string", other)),
        }
    }

    /// Optional string; absent keys yield `None`
    pub fn get_opt_str(&self, key: &str) -> Result<Option<&str>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ConfigError::invalid(key, "string", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.required(key)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| ConfigError::invalid(key, "integer", n)),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, "integer", s)),
            other => Err(ConfigError::invalid(key, "integer", other)),
        }
    }

    /// List of strings. Absent keys yield an empty list.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>> {
        match self.value(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(ConfigError::invalid(key, "list", other)),
                })
                .collect(),
            Some(Value::String(s)) => {
                let kind = schema::kind_of(key).unwrap_or(SettingKind::List);
                match schema::coerce(key, kind, Value::String(s.clone()))? {
                    Value::Array(items) => Ok(items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()),
                    other => Err(ConfigError::invalid(key, "list", other)),
                }
            }
            Some(other) => Err(ConfigError::invalid(key, "list", other)),
        }
    }

    /// JSON object. Absent keys yield an empty map.
    pub fn get_map(&self, key: &str) -> Result<Map<String, Value>> {
        match self.value(key) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(Value::String(s)) => match schema::coerce(key, SettingKind::Map, Value::String(s.clone()))? {
                Value::Object(map) => Ok(map),
                other => Err(ConfigError::invalid(key, "mapping", other)),
            },
            Some(other) => Err(ConfigError::invalid(key, "mapping", other)),
        }
    }

    /// Object reference, unresolved. Absent keys yield `None`.
    pub fn get_ref(&self, key: &str) -> Result<Option<ObjectRef>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => ObjectRef::parse(s).map(Some),
            Some(other) => Err(ConfigError::invalid(key, "object reference", other)),
        }
    }

    /// List of object references, in declared order
    pub fn get_refs(&self, key: &str) -> Result<Vec<ObjectRef>> {
        self.get_list(key)?
            .iter()
            .map(|raw| ObjectRef::parse(raw))
            .collect()
    }

    /// `tangled.app.<name>` as a raw value
    pub fn app_setting(&self, name: &str) -> Option<&Value> {
        self.value(&app_key(name))
    }

    pub fn app_bool(&self, name: &str) -> Result<bool> {
        self.get_bool(&app_key(name))
    }

    pub fn app_str(&self, name: &str) -> Result<&str> {
        self.get_str(&app_key(name))
    }

    pub fn app_list(&self, name: &str) -> Result<Vec<String>> {
        self.get_list(&app_key(name))
    }

    /// Package context for relative references
    pub fn package(&self) -> Option<&str> {
        self.value("package")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Application debug flag; unset means off
    pub fn debug(&self) -> bool {
        self.get_bool("debug").unwrap_or(false)
    }
}

/// Full key of an application setting
pub fn app_key(name: &str) -> String {
    format!("{}{}", APP_PREFIX, name)
}

/// Fluent construction of a [`Settings`] store
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    skip_defaults: bool,
    layers: Vec<Layer>,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an empty store instead of the built-in defaults
    pub fn without_defaults(mut self) -> Self {
        self.skip_defaults = true;
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Add an INI document as a layer
    pub fn ini(self, name: &str, text: &str) -> Result<Self> {
        Ok(self.layer(Layer::from_ini_str(name, text)?))
    }

    /// Add a settings file, format detected from its extension
    pub fn file(self, path: &str) -> Result<Self> {
        let layer = ConfigLoader::auto(path)?.load_file(path)?;
        Ok(self.layer(layer))
    }

    /// Add a single override value in its own layer
    pub fn set(self, key: &str, value: impl Into<Value>) -> Self {
        let layer = Layer::new(format!("set:{}", key)).set(key, value);
        self.layer(layer)
    }

    pub fn build(self) -> Result<Settings> {
        let mut settings = if self.skip_defaults {
            Settings::empty()
        } else {
            Settings::with_defaults()?
        };
        for layer in self.layers {
            settings.load(layer)?;
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::with_defaults().unwrap();
        assert!(!settings.app_bool("csrf.enabled").unwrap());
        assert_eq!(settings.app_str("csrf.header").unwrap(), "X-CSRFToken");
        assert_eq!(
            settings.app_list("tunnel_over_post").unwrap(),
            vec!["DELETE", "PATCH", "PUT"]
        );
        assert_eq!(settings.source("debug"), Some(&Source::Default));
        assert!(settings.package().is_none());
    }

    #[test]
    fn test_override_replaces_default() {
        let mut settings = Settings::with_defaults().unwrap();
        settings
            .load(Layer::new("app").set("tangled.app.csrf.enabled", "true"))
            .unwrap();
        assert!(settings.app_bool("csrf.enabled").unwrap());
        assert_eq!(
            settings.source("tangled.app.csrf.enabled"),
            Some(&Source::Override("app".into()))
        );
    }

    #[test]
    fn test_structured_values_replaced_whole() {
        let settings = Settings::builder()
            .set("tangled.app.tunnel_over_post", "PUT")
            .build()
            .unwrap();
        assert_eq!(settings.app_list("tunnel_over_post").unwrap(), vec!["PUT"]);
    }

    #[test]
    fn test_invalid_boolean_leaves_store_untouched() {
        let mut settings = Settings::with_defaults().unwrap();
        let err = settings
            .load(
                Layer::new("bad")
                    .set("tangled.app.name", "changed")
                    .set("debug", "yes"),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBoolean { .. }));
        assert_eq!(settings.app_str("name").unwrap(), "trellis");
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let settings = Settings::builder()
            .set("myapp.feature", json!({"a": 1}))
            .build()
            .unwrap();
        assert_eq!(settings.get("myapp.feature", Value::Null), json!({"a": 1}));
        assert_eq!(settings.get("missing", json!(7)), json!(7));
    }

    #[test]
    fn test_typed_getter_errors() {
        let settings = Settings::with_defaults().unwrap();
        assert!(matches!(
            settings.get_str("nope"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert!(matches!(
            settings.get_str("debug"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_refs() {
        let settings = Settings::builder()
            .set("tangled.app.load_config", ".hooks:setup myapp.more:setup")
            .build()
            .unwrap();
        let refs = settings.get_refs("tangled.app.load_config").unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].is_relative());
        assert_eq!(
            settings.get_ref("factory").unwrap().unwrap().as_str(),
            "trellis:Application"
        );
        assert!(settings
            .get_ref("tangled.app.error_resource")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_clones_are_independent() {
        let base = Settings::with_defaults().unwrap();
        let mut changed = base.clone();
        changed
            .load(Layer::new("x").set("debug", true))
            .unwrap();
        assert!(!base.debug());
        assert!(changed.debug());
    }
}
