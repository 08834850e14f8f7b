//! Object reference grammar.
//!
//! A reference addresses a loadable object as `module.path[:attribute[.nested]]`.
//! Module paths starting with `.` are relative to a package context; every
//! extra leading dot walks one package up.

use crate::{ConfigError, Result};
use std::fmt;

/// A parsed `module.path:attribute` string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    raw: String,
    module: String,
    attribute: Option<String>,
}

impl ObjectRef {
    /// Parse a reference, validating both halves of the grammar
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (module, attribute) = match raw.rsplit_once(':') {
            Some((module, attribute)) => (module, Some(attribute)),
            None => (raw, None),
        };

        let body = module.trim_start_matches('.');
        let relative = body.len() != module.len();

        // A bare run of dots (".:name") addresses the package itself
        let module_ok = if body.is_empty() {
            relative
        } else {
            is_dotted_path(body)
        };
        let attribute_ok = attribute.is_none_or(is_dotted_path);

        if !module_ok || !attribute_ok {
            return Err(ConfigError::InvalidReference(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            module: module.to_string(),
            attribute: attribute.map(str::to_string),
        })
    }

    /// The reference exactly as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Module part, leading dots included
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Attribute part, if any
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Attribute split into its nested segments
    pub fn attribute_path(&self) -> Vec<&str> {
        self.attribute
            .as_deref()
            .map(|a| a.split('.').collect())
            .unwrap_or_default()
    }

    /// Last attribute segment, falling back to the last module segment
    pub fn short_name(&self) -> &str {
        match &self.attribute {
            Some(attribute) => attribute.rsplit('.').next().unwrap_or(attribute),
            None => self.module.rsplit('.').next().unwrap_or(&self.module),
        }
    }

    pub fn is_relative(&self) -> bool {
        self.module.starts_with('.')
    }

    /// Anchor a relative reference to `package`.
    ///
    /// Absolute references are returned unchanged. Returns `None` when the
    /// reference is relative and there is no package, or when the leading
    /// dots climb above the top-level package.
    pub fn absolute(&self, package: Option<&str>) -> Option<ObjectRef> {
        if !self.is_relative() {
            return Some(self.clone());
        }

        let package = package.filter(|p| !p.is_empty())?;
        let rest = self.module.trim_start_matches('.');
        let ups = self.module.len() - rest.len() - 1;

        let segments: Vec<&str> = package.split('.').collect();
        if ups >= segments.len() {
            return None;
        }

        let mut module = segments[..segments.len() - ups].join(".");
        if !rest.is_empty() {
            module.push('.');
            module.push_str(rest);
        }

        let raw = match &self.attribute {
            Some(attribute) => format!("{}:{}", module, attribute),
            None => module.clone(),
        };

        Some(ObjectRef {
            raw,
            module,
            attribute: self.attribute.clone(),
        })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for ObjectRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_dotted_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_identifier)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute() {
        let r = ObjectRef::parse("myapp.models:User").unwrap();
        assert_eq!(r.module(), "myapp.models");
        assert_eq!(r.attribute(), Some("User"));
        assert!(!r.is_relative());
    }

    #[test]
    fn test_parse_nested_attribute() {
        let r = ObjectRef::parse("myapp.models:User.query").unwrap();
        assert_eq!(r.attribute_path(), vec!["User", "query"]);
        assert_eq!(r.short_name(), "query");
    }

    #[test]
    fn test_parse_module_only() {
        let r = ObjectRef::parse("myapp.views").unwrap();
        assert_eq!(r.attribute(), None);
        assert_eq!(r.short_name(), "views");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ObjectRef::parse("").is_err());
        assert!(ObjectRef::parse("my app:User").is_err());
        assert!(ObjectRef::parse("myapp..models:User").is_err());
        assert!(ObjectRef::parse("myapp:").is_err());
        assert!(ObjectRef::parse("1app:User").is_err());
    }

    #[test]
    fn test_relative_needs_package() {
        let r = ObjectRef::parse(".models:User").unwrap();
        assert!(r.is_relative());
        assert!(r.absolute(None).is_none());
        assert!(r.absolute(Some("")).is_none());
    }

    #[test]
    fn test_relative_resolution() {
        let r = ObjectRef::parse(".models:User").unwrap();
        let abs = r.absolute(Some("myapp")).unwrap();
        assert_eq!(abs.as_str(), "myapp.models:User");

        let up = ObjectRef::parse("..util:helper").unwrap();
        assert_eq!(
            up.absolute(Some("myapp.web")).unwrap().as_str(),
            "myapp.util:helper"
        );
        assert!(up.absolute(Some("myapp")).is_none());

        let itself = ObjectRef::parse(".:settings").unwrap();
        assert_eq!(
            itself.absolute(Some("myapp")).unwrap().as_str(),
            "myapp:settings"
        );
    }
}
