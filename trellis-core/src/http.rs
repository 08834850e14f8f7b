// HTTP request and response types

use crate::error::{DispatchError, Error, Result};
use crate::resource::ResourceMatch;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::GET,
        HttpMethod::HEAD,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::PATCH,
        HttpMethod::DELETE,
        HttpMethod::OPTIONS,
    ];

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Some(HttpMethod::GET),
            "HEAD" => Some(HttpMethod::HEAD),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "PATCH" => Some(HttpMethod::PATCH),
            "DELETE" => Some(HttpMethod::DELETE),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }

    /// Methods that change state
    pub fn is_unsafe(&self) -> bool {
        matches!(
            self,
            HttpMethod::POST | HttpMethod::PUT | HttpMethod::PATCH | HttpMethod::DELETE
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request adjustments made by the tweaker and csrf stages
#[derive(Debug, Clone, Default)]
pub struct Tweaks {
    /// Accept value overriding the header
    pub accept: Option<String>,
    /// Content type picked for the response
    pub content_type: Option<String>,
    /// Original method when the request was tunnelled over POST
    pub tunneled_from: Option<HttpMethod>,
    /// CSRF token in effect for this request
    pub csrf_token: Option<String>,
    /// Whether the CSRF cookie must be (re)issued on the way out
    pub csrf_token_minted: bool,
}

/// Read-only snapshot of a request, carried by events
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: String,
    pub method: HttpMethod,
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// The failure an error resource is rendering
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub status: u16,
    pub detail: String,
}

/// Callback run after the chain for non-static requests
pub type FinishedCallback =
    Box<dyn FnOnce(&Request, Option<&Response>) -> std::result::Result<(), String> + Send + Sync>;

/// HTTP request wrapper
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    /// Header names are stored lowercase
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub urlvars: HashMap<String, String>,
    pub tweaks: Tweaks,
    request_id: String,
    resource: Option<ResourceMatch>,
    response: Option<Response>,
    is_static: bool,
    error: Option<ErrorInfo>,
    received_at: Instant,
    finished_callbacks: Vec<FinishedCallback>,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            urlvars: HashMap::new(),
            tweaks: Tweaks::default(),
            request_id: uuid::Uuid::new_v4().to_string(),
            resource: None,
            response: None,
            is_static: false,
            error: None,
            received_at: Instant::now(),
            finished_callbacks: Vec::new(),
        }
    }

    /// Build a request from a raw `http` message
    pub fn from_http(raw: http::Request<Bytes>) -> Result<Self> {
        let (parts, body) = raw.into_parts();
        let method = HttpMethod::from_str(parts.method.as_str())
            .ok_or_else(|| DispatchError::UnsupportedMethod(parts.method.to_string()))?;

        let mut request = Request::new(method, parts.uri.path());
        request.query = parts.uri.query().unwrap_or_default().to_string();
        request.body = body;

        for (name, value) in parts.headers.iter() {
            if let Ok(value) = value.to_str() {
                request
                    .headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        if let Some(id) = request.header("x-request-id").filter(|id| !id.is_empty()) {
            request.request_id = id.to_string();
        }

        Ok(request)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_lowercase(), value.into());
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Time since the request was built
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Media type of the body, without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
    }

    /// Accept value in effect, honouring any override
    pub fn accept(&self) -> Option<&str> {
        self.tweaks.accept.as_deref().or_else(|| self.header("accept"))
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(&self.query).unwrap_or_default()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Remove a query parameter, returning its value
    pub fn remove_query_param(&mut self, name: &str) -> Option<String> {
        let mut params = self.query_params();
        let index = params.iter().position(|(k, _)| k == name)?;
        let (_, value) = params.remove(index);
        params.retain(|(k, _)| k != name);
        self.query = serde_urlencoded::to_string(&params).unwrap_or_default();
        Some(value)
    }

    pub fn is_form(&self) -> bool {
        self.content_type() == Some("application/x-www-form-urlencoded")
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct == "application/json" || ct.ends_with("+json"))
    }

    /// Form body parameters; empty unless the body is url-encoded
    pub fn form_params(&self) -> Vec<(String, String)> {
        if !self.is_form() {
            return Vec::new();
        }
        serde_urlencoded::from_bytes(&self.body).unwrap_or_default()
    }

    pub fn form_param(&self, name: &str) -> Option<String> {
        self.form_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Remove a form parameter from the body, returning its value
    pub fn remove_form_param(&mut self, name: &str) -> Option<String> {
        let mut params = self.form_params();
        let index = params.iter().position(|(k, _)| k == name)?;
        let (_, value) = params.remove(index);
        params.retain(|(k, _)| k != name);
        self.body = Bytes::from(serde_urlencoded::to_string(&params).unwrap_or_default());
        Some(value)
    }

    /// Query parameter, falling back to the form body
    pub fn param(&self, name: &str) -> Option<String> {
        self.query_param(name).or_else(|| self.form_param(name))
    }

    /// Parse the request body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::bad_request(format!("Invalid JSON body: {}", e)))
    }

    /// Cookie value by name
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    }

    /// URL variable captured by the matched resource
    pub fn urlvar(&self, name: &str) -> Option<&str> {
        self.urlvars.get(name).map(String::as_str)
    }

    pub fn resource(&self) -> Option<&ResourceMatch> {
        self.resource.as_ref()
    }

    pub fn set_resource(&mut self, found: ResourceMatch) {
        self.urlvars = found.urlvars.clone();
        self.resource = Some(found);
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn mark_static(&mut self) {
        self.is_static = true;
    }

    /// Set while an error resource handles the request
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: ErrorInfo) {
        self.error = Some(error);
    }

    /// Register a callback to run once the response is ready.
    ///
    /// Every callback runs even when an earlier one fails; any failure
    /// replaces the response with a 500.
    pub fn on_finished<F>(&mut self, callback: F)
    where
        F: FnOnce(&Request, Option<&Response>) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.finished_callbacks.push(Box::new(callback));
    }

    pub(crate) fn take_finished_callbacks(&mut self) -> Vec<FinishedCallback> {
        std::mem::take(&mut self.finished_callbacks)
    }

    /// Snapshot for event payloads
    pub fn info(&self) -> Arc<RequestInfo> {
        Arc::new(RequestInfo {
            request_id: self.request_id.clone(),
            method: self.method,
            path: self.path.clone(),
            headers: self.headers.clone(),
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("tweaks", &self.tweaks)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn not_modified() -> Self {
        Self::new(304)
    }

    pub fn forbidden() -> Self {
        Self::new(403)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(text.into().into_bytes())
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.set_header("Content-Type", "application/json");
        Ok(self)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any existing value regardless of case
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        self.headers.remove(&key)
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert into a raw `http` message
    pub fn into_http(self) -> http::Response<Bytes> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(Bytes::from(self.body)).unwrap_or_else(|_| {
            let mut fallback = http::Response::new(Bytes::from_static(b"Internal Server Error"));
            *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}
