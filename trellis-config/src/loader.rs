// Settings file loaders

use crate::{ConfigError, Layer, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Ini,
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ini" | "cfg" | "conf" => Some(FileFormat::Ini),
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// Settings file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: &str) -> Result<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    /// Load a file as a layer named after its path
    pub fn load_file(&self, path: &str) -> Result<Layer> {
        let content = fs::read_to_string(path)?;
        debug!(path = %path, format = ?self.format, "Loaded settings file");
        self.parse(path, &content)
    }

    /// Parse `content` into a layer called `name`
    pub fn parse(&self, name: &str, content: &str) -> Result<Layer> {
        match self.format {
            FileFormat::Ini => Layer::from_ini_str(name, content),
            FileFormat::Json => {
                let value: Value = serde_json::from_str(content).map_err(|e| {
                    ConfigError::ParseError {
                        line: e.line(),
                        message: format!("JSON parse error: {}", e),
                    }
                })?;
                Self::structured_layer(name, value)
            }
            FileFormat::Toml => {
                let value: toml::Value = toml::from_str(content).map_err(|e| {
                    ConfigError::ParseError {
                        line: 0,
                        message: format!("TOML parse error: {}", e),
                    }
                })?;
                let value = serde_json::to_value(value)
                    .map_err(|e| ConfigError::LoadError(e.to_string()))?;
                Self::structured_layer(name, value)
            }
        }
    }

    // Top-level keys are setting keys; an `app` table, when present, takes
    // the role of the INI `[app]` section.
    fn structured_layer(name: &str, value: Value) -> Result<Layer> {
        let Value::Object(mut map) = value else {
            return Err(ConfigError::LoadError(format!(
                "{}: top level must be a table",
                name
            )));
        };

        let values = match map.remove("app") {
            Some(Value::Object(app)) => app,
            Some(other) => {
                map.insert("app".to_string(), other);
                map
            }
            None => map,
        };
        Ok(Layer::from_map(name, values))
    }
}

/// A parsed INI document.
///
/// Supports `[section]` headers, `key = value` pairs, `#` and `;` comments
/// and indented continuation lines, which are joined with newlines.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut section: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = raw.starts_with(char::is_whitespace);
            if indented {
                if let (Some(name), Some(key)) = (&section, &last_key) {
                    if let Some(value) = sections.get_mut(name).and_then(|s| s.get_mut(key)) {
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                section = Some(name);
                last_key = None;
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_no,
                    message: format!("expected `key = value`, got {:?}", trimmed),
                });
            };
            let Some(name) = &section else {
                return Err(ConfigError::ParseError {
                    line: line_no,
                    message: "key outside of any section".to_string(),
                });
            };

            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::ParseError {
                    line: line_no,
                    message: "empty key".to_string(),
                });
            }
            sections
                .entry(name.clone())
                .or_default()
                .insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }

        Ok(Self { sections })
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub(crate) fn take_section(&mut self, name: &str) -> Option<BTreeMap<String, String>> {
        self.sections.remove(name)
    }

    pub(crate) fn into_sections(self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.sections
    }

    /// Section flattened to a JSON map of string values
    pub fn section_map(&self, name: &str) -> Map<String, Value> {
        self.section(name)
            .map(|s| {
                s.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# sample
[app]
factory = trellis:Application
debug = true
tangled.app.resources =
    home .resources:Home /
    users .resources:Users /users/{id}

[logger_root]
level = DEBUG
"#;

    #[test]
    fn test_parse_ini() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.get("app", "factory"), Some("trellis:Application"));
        assert_eq!(
            doc.get("app", "tangled.app.resources"),
            Some("home .resources:Home /\nusers .resources:Users /users/{id}")
        );
        assert_eq!(doc.get("logger_root", "level"), Some("DEBUG"));
    }

    #[test]
    fn test_parse_ini_errors() {
        assert!(matches!(
            IniDocument::parse("key = value"),
            Err(ConfigError::ParseError { line: 1, .. })
        ));
        assert!(matches!(
            IniDocument::parse("[app]\nno equals sign"),
            Err(ConfigError::ParseError { line: 2, .. })
        ));
    }

    #[test]
    fn test_parse_json_app_table() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let layer = loader
            .parse("app.json", r#"{"app": {"debug": true}, "other": 1}"#)
            .unwrap();
        assert_eq!(layer.get("debug"), Some(&Value::Bool(true)));
        assert!(layer.get("other").is_none());
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let layer = loader
            .parse(
                "app.toml",
                r#"
                "tangled.app.csrf.enabled" = true
                "tangled.app.tunnel_over_post" = ["PUT"]
                "#,
            )
            .unwrap();
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("ini"), Some(FileFormat::Ini));
        assert_eq!(FileFormat::from_extension("JSON"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("toml"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
    }
}
