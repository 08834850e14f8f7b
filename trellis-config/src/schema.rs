//! Setting schema.
//!
//! Every setting the pipeline consumes is declared here with an explicit
//! [`SettingKind`]. Text values (INI, environment) are converted to that
//! kind when a layer is loaded; keys missing from the schema are kept
//! exactly as given.

use crate::{ConfigError, ObjectRef, Result};
use serde_json::Value;

/// Namespace prefix of application settings
pub const APP_PREFIX: &str = "tangled.app.";

/// How a setting's value is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// `true` / `false`
    Bool,
    /// Plain string, never resolved
    Str,
    /// Signed integer
    Int,
    /// Tokens separated by whitespace or commas
    List,
    /// One entry per non-empty line
    Lines,
    /// JSON object
    Map,
    /// Object reference, resolved by the consumer
    Object,
    /// Object reference that may be left empty
    OptionalObject,
    /// Whitespace separated object references
    ObjectList,
}

impl SettingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKind::Bool => "bool",
            SettingKind::Str => "string",
            SettingKind::Int => "integer",
            SettingKind::List => "list",
            SettingKind::Lines => "lines",
            SettingKind::Map => "mapping",
            SettingKind::Object => "object reference",
            SettingKind::OptionalObject => "optional object reference",
            SettingKind::ObjectList => "object reference list",
        }
    }
}

/// A schema entry: key, kind and the default in its text form
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub key: &'static str,
    pub kind: SettingKind,
    pub default: Option<&'static str>,
}

const fn spec(key: &'static str, kind: SettingKind, default: Option<&'static str>) -> SettingSpec {
    SettingSpec { key, kind, default }
}

use SettingKind::*;

/// Built-in settings and their defaults
pub const SCHEMA: &[SettingSpec] = &[
    spec("factory", Object, Some("trellis:Application")),
    spec("package", Str, None),
    spec("debug", Bool, Some("false")),
    spec("debug.pdb", Bool, Some("false")),
    spec("tangled.app.testing", Bool, Some("false")),
    spec("tangled.app.cors.enabled", Bool, Some("false")),
    spec("tangled.app.cors.permissive", Bool, Some("false")),
    spec("tangled.app.cors.allowed_origins", List, Some("")),
    spec("tangled.app.csrf.enabled", Bool, Some("false")),
    spec("tangled.app.csrf.token", Str, Some("tangled.web.csrf_token")),
    spec("tangled.app.csrf.header", Str, Some("X-CSRFToken")),
    spec("tangled.app.csrf.secret", Str, None),
    spec("tangled.app.csrf.token_ttl", Int, Some("86400")),
    spec("tangled.app.default_content_type", Str, Some("application/json")),
    spec("tangled.app.error_resource", OptionalObject, None),
    spec(
        "tangled.app.exc_log_message_factory",
        Object,
        Some("trellis.app:exc_log_message"),
    ),
    spec("tangled.app.name", Str, Some("trellis")),
    spec("tangled.app.helpers", Object, Some("trellis.helpers:Helpers")),
    spec("tangled.app.includes", ObjectList, Some("")),
    spec("tangled.app.defer_created", Bool, Some("false")),
    spec("tangled.app.on_created", ObjectList, Some("")),
    spec("tangled.app.representation.args", Map, Some("{}")),
    spec("tangled.app.request_factory", Object, Some("trellis.request:Request")),
    spec("tangled.app.response_factory", Object, Some("trellis.response:Response")),
    spec("tangled.app.resources", Lines, Some("")),
    spec("tangled.app.resources.package", Str, None),
    spec("tangled.app.load_config", ObjectList, Some("")),
    spec("tangled.app.set_accept_from_ext", Bool, Some("true")),
    spec("tangled.app.static_directories", Lines, Some("")),
    spec("tangled.app.tunnel_over_post", List, Some("DELETE PATCH PUT")),
    spec("tangled.app.handler.exc", Object, Some("trellis.handlers:exc_handler")),
    spec(
        "tangled.app.handler.static_files",
        Object,
        Some("trellis.handlers:static_files"),
    ),
    spec("tangled.app.handler.tweaker", Object, Some("trellis.handlers:tweaker")),
    spec("tangled.app.handler.notifier", Object, Some("trellis.handlers:notifier")),
    spec(
        "tangled.app.handler.resource_finder",
        Object,
        Some("trellis.handlers:resource_finder"),
    ),
    spec("tangled.app.handler.csrf", Object, Some("trellis.csrf:csrf_handler")),
    spec("tangled.app.handler.cors", Object, Some("trellis.handlers:cors_handler")),
    spec("tangled.app.handler.main", Object, Some("trellis.handlers:main")),
    spec("tangled.app.handlers", Lines, Some("")),
    spec(
        "tangled.app.representation.json.encoder",
        Object,
        Some("trellis.representations:JsonEncoder"),
    ),
    spec(
        "tangled.app.representation.json.encoder.default",
        OptionalObject,
        None,
    ),
];

/// Look up the declared kind of `key`
pub fn kind_of(key: &str) -> Option<SettingKind> {
    SCHEMA.iter().find(|s| s.key == key).map(|s| s.kind)
}

/// Parse a boolean token. Only `true` and `false` are accepted.
pub fn parse_bool(key: &str, token: &str) -> Result<bool> {
    let trimmed = token.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: token.to_string(),
        })
    }
}

/// Convert `value` to the representation `kind` demands
pub fn coerce(key: &str, kind: SettingKind, value: Value) -> Result<Value> {
    match (kind, value) {
        (Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (Bool, Value::String(s)) => parse_bool(key, &s).map(Value::Bool),
        (Bool, other) => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: other.to_string(),
        }),

        (Str, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        (Str, Value::Null) => Ok(Value::Null),
        (Str, v @ (Value::Bool(_) | Value::Number(_))) => Ok(Value::String(v.to_string())),

        (Int, Value::Number(n)) if n.is_i64() => Ok(Value::Number(n)),
        (Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ConfigError::invalid(key, kind.as_str(), s)),

        (List, Value::String(s)) => Ok(string_array(split_tokens(&s))),
        (List | Lines, Value::Array(items)) => string_items(key, kind, items).map(string_array),
        (Lines, Value::String(s)) => Ok(string_array(split_lines(&s))),

        (Map, Value::Object(map)) => Ok(Value::Object(map)),
        (Map, Value::String(s)) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        (Map, Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Ok(Value::Object(map)),
            _ => Err(ConfigError::invalid(key, kind.as_str(), s)),
        },

        (Object, Value::String(s)) => checked_ref(&s).map(Value::String),
        (OptionalObject, Value::Null) => Ok(Value::Null),
        (OptionalObject, Value::String(s)) if s.trim().is_empty() => Ok(Value::Null),
        (OptionalObject, Value::String(s)) => checked_ref(&s).map(Value::String),

        (ObjectList, Value::String(s)) => split_tokens(&s)
            .iter()
            .map(|r| checked_ref(r))
            .collect::<Result<Vec<_>>>()
            .map(string_array),
        (ObjectList, Value::Array(items)) => string_items(key, kind, items)?
            .iter()
            .map(|r| checked_ref(r))
            .collect::<Result<Vec<_>>>()
            .map(string_array),

        (kind, other) => Err(ConfigError::invalid(key, kind.as_str(), other)),
    }
}

fn checked_ref(raw: &str) -> Result<String> {
    ObjectRef::parse(raw).map(|r| r.as_str().to_string())
}

fn split_tokens(s: &str) -> Vec<String> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_items(key: &str, kind: SettingKind, items: Vec<Value>) -> Result<Vec<String>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::invalid(key, kind.as_str(), other)),
        })
        .collect()
}

fn string_array(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_keys_are_unique() {
        let mut keys: Vec<&str> = SCHEMA.iter().map(|s| s.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), SCHEMA.len());
    }

    #[test]
    fn test_defaults_coerce() {
        for spec in SCHEMA {
            if let Some(default) = spec.default {
                assert!(
                    coerce(spec.key, spec.kind, Value::String(default.to_string())).is_ok(),
                    "default for {} does not coerce",
                    spec.key
                );
            }
        }
    }

    #[test]
    fn test_bool_tokens() {
        assert_eq!(parse_bool("k", "true").unwrap(), true);
        assert_eq!(parse_bool("k", " False ").unwrap(), false);
        assert!(matches!(
            parse_bool("k", "yes"),
            Err(ConfigError::InvalidBoolean { .. })
        ));
        assert!(matches!(
            coerce("k", Bool, json!(1)),
            Err(ConfigError::InvalidBoolean { .. })
        ));
    }

    #[test]
    fn test_list_and_lines() {
        assert_eq!(
            coerce("k", List, json!("DELETE, PATCH\nPUT")).unwrap(),
            json!(["DELETE", "PATCH", "PUT"])
        );
        assert_eq!(
            coerce("k", Lines, json!("\n  users myapp:Users /users\n\n  home myapp:Home /\n")).unwrap(),
            json!(["users myapp:Users /users", "home myapp:Home /"])
        );
    }

    #[test]
    fn test_object_kinds() {
        assert_eq!(
            coerce("k", Object, json!(" myapp:thing ")).unwrap(),
            json!("myapp:thing")
        );
        assert!(coerce("k", Object, json!("not a ref")).is_err());
        assert_eq!(coerce("k", OptionalObject, json!("")).unwrap(), Value::Null);
        assert_eq!(
            coerce("k", ObjectList, json!("a:b .c:d")).unwrap(),
            json!(["a:b", ".c:d"])
        );
    }

    #[test]
    fn test_map_from_text() {
        assert_eq!(
            coerce("k", Map, json!(r#"{"application/json": {"pretty": true}}"#)).unwrap(),
            json!({"application/json": {"pretty": true}})
        );
        assert!(coerce("k", Map, json!("[1, 2]")).is_err());
    }
}
