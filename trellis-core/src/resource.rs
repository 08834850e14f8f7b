// Resources and URL mounting

use crate::application::Application;
use crate::error::{Error, Result};
use crate::http::{HttpMethod, Request, Response};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trellis_config::{ConfigError, ObjectRef};

/// What a resource method hands back to the main stage
pub enum Data {
    /// Nothing to render; answered with 204 unless a status is configured
    None,
    /// Structured data rendered through the negotiated representation
    Json(Value),
    /// Plain text
    Text(String),
    /// Arbitrary object, turned into JSON by the encoder's default hook
    Object(Arc<dyn Any + Send + Sync>),
    /// A finished response, returned as is
    Response(Response),
}

impl Data {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Data::Json)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Data::Object(Arc::new(value))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        Data::Json(value)
    }
}

impl From<String> for Data {
    fn from(text: String) -> Self {
        Data::Text(text)
    }
}

impl From<&str> for Data {
    fn from(text: &str) -> Self {
        Data::Text(text.to_string())
    }
}

impl From<Response> for Data {
    fn from(response: Response) -> Self {
        Data::Response(response)
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::None => f.write_str("None"),
            Data::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Data::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Data::Object(_) => f.write_str("Object(..)"),
            Data::Response(r) => f.debug_tuple("Response").field(&r.status).finish(),
        }
    }
}

/// Per-method rendering options
#[derive(Debug, Clone, Default)]
pub struct MethodConfig {
    /// Status to answer with instead of the default
    pub status: Option<u16>,
    /// Representation to use regardless of the Accept header
    pub content_type: Option<String>,
    /// Extra arguments for the representation
    pub representation_args: Map<String, Value>,
    /// Headers added to the response
    pub headers: Vec<(String, String)>,
}

impl MethodConfig {
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.representation_args.insert(name.to_string(), value.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// A set of method handlers bound to a URL
#[async_trait]
pub trait Resource: Send + Sync {
    /// Methods this resource responds to
    fn allowed_methods(&self) -> Vec<HttpMethod> {
        vec![HttpMethod::GET]
    }

    /// Rendering options for `method`
    fn config(&self, _method: HttpMethod) -> MethodConfig {
        MethodConfig::default()
    }

    async fn handle(&self, app: &Application, method: HttpMethod, request: &mut Request) -> Result<Data>;
}

/// The resource picked for a request
#[derive(Clone)]
pub struct ResourceMatch {
    pub name: String,
    pub resource: Arc<dyn Resource>,
    pub method: HttpMethod,
    pub urlvars: HashMap<String, String>,
}

impl fmt::Debug for ResourceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMatch")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("urlvars", &self.urlvars)
            .finish()
    }
}

/// A resource mounted at a path pattern.
///
/// Patterns use `{name}` for a `[\w-]+` segment and `{name:regex}` for a
/// custom expression.
#[derive(Clone)]
pub struct MountedResource {
    pub name: String,
    pub path: String,
    pub methods: Vec<HttpMethod>,
    resource: Arc<dyn Resource>,
    regex: Regex,
    vars: Vec<String>,
}

impl MountedResource {
    pub fn new(
        name: impl Into<String>,
        resource: Arc<dyn Resource>,
        path: impl Into<String>,
        methods: Vec<HttpMethod>,
    ) -> Result<Self> {
        let name = name.into();
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        let (pattern, vars) = compile_pattern(&path)?;
        let regex = Regex::new(&pattern).map_err(|e| {
            Error::Config(ConfigError::invalid(
                "tangled.app.resources",
                "valid path pattern",
                format!("{} ({})", path, e),
            ))
        })?;

        Ok(Self {
            name,
            path,
            methods,
            resource,
            regex,
            vars,
        })
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    /// URL variables when `path` matches, ignoring the method
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.vars
                .iter()
                .filter_map(|var| {
                    captures
                        .name(var)
                        .map(|m| (var.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    /// Whether the mount and the resource both accept `method`
    pub fn allows(&self, method: HttpMethod) -> bool {
        (self.methods.is_empty() || self.methods.contains(&method))
            && self.resource.allowed_methods().contains(&method)
    }

    /// Methods reachable through this mount
    pub fn allowed_methods(&self) -> Vec<HttpMethod> {
        self.resource
            .allowed_methods()
            .into_iter()
            .filter(|m| self.methods.is_empty() || self.methods.contains(m))
            .collect()
    }

    /// Build a path from URL variables
    pub fn format_path(&self, vars: &HashMap<String, String>) -> Result<String> {
        let mut out = String::new();
        let mut rest = self.path.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let (inner, after) = split_braced(&rest[start..]).ok_or_else(|| {
                Error::Internal(format!("Unbalanced pattern {}", self.path))
            })?;
            let var = inner.split_once(':').map(|(n, _)| n).unwrap_or(inner);
            let value = vars
                .get(var)
                .ok_or_else(|| Error::Internal(format!("Missing URL variable `{}` for {}", var, self.name)))?;
            out.push_str(value);
            rest = after;
        }
        out.push_str(rest);

        if !self.regex.is_match(&out) {
            return Err(Error::Internal(format!(
                "Invalid substitutions {:?} for {}",
                vars, self.path
            )));
        }
        Ok(out)
    }
}

impl fmt::Debug for MountedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedResource")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .finish()
    }
}

// Returns the text inside the leading `{...}` and what follows it.
// Braces nest so quantifiers such as `\d{4}` survive.
fn split_braced(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[1..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn compile_pattern(path: &str) -> Result<(String, Vec<String>)> {
    let bad = |detail: &str| {
        Error::Config(ConfigError::invalid(
            "tangled.app.resources",
            "valid path pattern",
            format!("{} ({})", path, detail),
        ))
    };

    let mut regex = String::from("^");
    let mut vars = Vec::new();
    let mut rest = path;

    while let Some(start) = rest.find('{') {
        regex.push_str(&regex::escape(&rest[..start]));
        let (inner, after) = split_braced(&rest[start..]).ok_or_else(|| bad("unbalanced braces"))?;
        let (name, expr) = match inner.split_once(':') {
            Some((name, expr)) => (name, expr),
            None => (inner, r"[\w-]+"),
        };
        if name.is_empty() || !name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
            return Err(bad("bad variable name"));
        }
        if vars.iter().any(|v| v == name) {
            return Err(bad("duplicate variable"));
        }
        regex.push_str(&format!("(?P<{}>{})", name, expr));
        vars.push(name.to_string());
        rest = after;
    }
    regex.push_str(&regex::escape(rest));
    regex.push('$');
    Ok((regex, vars))
}

/// One line of `tangled.app.resources`:
/// `name reference /path/{pattern} [METHOD,METHOD]`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLine {
    pub name: String,
    pub reference: ObjectRef,
    pub path: String,
    pub methods: Vec<HttpMethod>,
}

impl ResourceLine {
    pub fn parse(line: &str) -> std::result::Result<Self, ConfigError> {
        let bad = || ConfigError::invalid("tangled.app.resources", "`name reference /path [METHODS]`", line);
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or_else(bad)?;
        let reference = ObjectRef::parse(parts.next().ok_or_else(bad)?)?;
        let path = parts.next().ok_or_else(bad)?;
        let methods = match parts.next() {
            Some(list) => parse_methods(list).ok_or_else(bad)?,
            None => Vec::new(),
        };
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self {
            name: name.to_string(),
            reference,
            path: path.to_string(),
            methods,
        })
    }
}

/// Parse a comma separated method list
pub fn parse_methods(list: &str) -> Option<Vec<HttpMethod>> {
    list.split(',')
        .filter(|m| !m.trim().is_empty())
        .map(HttpMethod::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Users;

    #[async_trait]
    impl Resource for Users {
        fn allowed_methods(&self) -> Vec<HttpMethod> {
            vec![HttpMethod::GET, HttpMethod::PUT]
        }

        async fn handle(&self, _app: &Application, _method: HttpMethod, _request: &mut Request) -> Result<Data> {
            Ok(Data::None)
        }
    }

    fn mount(path: &str, methods: Vec<HttpMethod>) -> MountedResource {
        MountedResource::new("users", Arc::new(Users), path, methods).unwrap()
    }

    #[test]
    fn test_match_simple_var() {
        let mounted = mount("/users/{id}", vec![]);
        let vars = mounted.match_path("/users/ann-1").unwrap();
        assert_eq!(vars["id"], "ann-1");
        assert!(mounted.match_path("/users/ann/extra").is_none());
        assert!(mounted.match_path("/users/").is_none());
    }

    #[test]
    fn test_match_custom_regex() {
        let mounted = mount("/archive/{year:\\d{4}}/{slug}", vec![]);
        let vars = mounted.match_path("/archive/2024/hello").unwrap();
        assert_eq!(vars["year"], "2024");
        assert!(mounted.match_path("/archive/24/hello").is_none());
    }

    #[test]
    fn test_literal_parts_are_escaped() {
        let mounted = mount("users.json", vec![]);
        assert_eq!(mounted.path, "/users.json");
        assert!(mounted.match_path("/users.json").is_some());
        assert!(mounted.match_path("/usersxjson").is_none());
    }

    #[test]
    fn test_method_restriction() {
        let open = mount("/u", vec![]);
        assert!(open.allows(HttpMethod::PUT));
        assert!(!open.allows(HttpMethod::DELETE));

        let restricted = mount("/u", vec![HttpMethod::GET]);
        assert!(!restricted.allows(HttpMethod::PUT));
        assert_eq!(restricted.allowed_methods(), vec![HttpMethod::GET]);
    }

    #[test]
    fn test_format_path() {
        let mounted = mount("/users/{id}", vec![]);
        let mut vars = HashMap::new();
        vars.insert("id".to_string(), "7".to_string());
        assert_eq!(mounted.format_path(&vars).unwrap(), "/users/7");

        vars.insert("id".to_string(), "bad/value".to_string());
        assert!(mounted.format_path(&vars).is_err());
    }

    #[test]
    fn test_bad_patterns() {
        assert!(MountedResource::new("x", Arc::new(Users), "/a/{id", vec![]).is_err());
        assert!(MountedResource::new("x", Arc::new(Users), "/a/{id}/{id}", vec![]).is_err());
        assert!(MountedResource::new("x", Arc::new(Users), "/a/{}", vec![]).is_err());
    }

    #[test]
    fn test_parse_resource_line() {
        let line = ResourceLine::parse("users .resources:Users /users/{id} GET,PUT").unwrap();
        assert_eq!(line.name, "users");
        assert!(line.reference.is_relative());
        assert_eq!(line.methods, vec![HttpMethod::GET, HttpMethod::PUT]);

        assert!(ResourceLine::parse("users .resources:Users").is_err());
        assert!(ResourceLine::parse("users .resources:Users /u BREW").is_err());
    }
}
