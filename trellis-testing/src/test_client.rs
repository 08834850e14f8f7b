// Test HTTP client

use bytes::Bytes;
use std::collections::HashMap;
use trellis_core::{Application, HttpMethod};

/// Drives requests through [`Application::dispatch`] without a socket
#[derive(Clone)]
pub struct TestClient {
    app: Application,
    cookies: HashMap<String, String>,
}

impl TestClient {
    pub fn new(app: Application) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
        }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub async fn get(&mut self, path: &str) -> TestResponse {
        self.send(TestRequestBuilder::new(HttpMethod::GET, path)).await
    }

    pub async fn post(&mut self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(TestRequestBuilder::new(HttpMethod::POST, path).body(body))
            .await
    }

    pub async fn put(&mut self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(TestRequestBuilder::new(HttpMethod::PUT, path).body(body))
            .await
    }

    pub async fn patch(&mut self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(TestRequestBuilder::new(HttpMethod::PATCH, path).body(body))
            .await
    }

    pub async fn delete(&mut self, path: &str) -> TestResponse {
        self.send(TestRequestBuilder::new(HttpMethod::DELETE, path)).await
    }

    /// Send a request, replaying cookies set by earlier responses
    pub async fn send(&mut self, builder: TestRequestBuilder) -> TestResponse {
        let builder = if self.cookies.is_empty() || builder.headers.contains_key("cookie") {
            builder
        } else {
            let jar: Vec<String> = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            builder.header("Cookie", &jar.join("; "))
        };

        let response = TestResponse::from_http(self.app.dispatch(builder.build()).await);
        if let Some(set_cookie) = response.header("set-cookie") {
            let pair = set_cookie.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                self.cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        response
    }

    /// Cookie value captured from a previous response
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }
}

/// Builder for test requests
#[derive(Debug, Clone)]
pub struct TestRequestBuilder {
    method: HttpMethod,
    path: String,
    headers: HashMap<String, String>,
    query: Vec<(String, String)>,
    body: Bytes,
}

impl TestRequestBuilder {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T: serde::Serialize>(mut self, data: &T) -> serde_json::Result<Self> {
        self.body = serde_json::to_vec(data)?.into();
        Ok(self.header("Content-Type", "application/json"))
    }

    /// URL-encoded form body
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded: Vec<String> = fields
            .iter()
            .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
            .collect();
        self.body = Bytes::from(encoded.join("&"));
        self.header("Content-Type", "application/x-www-form-urlencoded")
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> http::Request<Bytes> {
        let mut uri = self.path;
        if !self.query.is_empty() {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
                .collect();
            uri.push('?');
            uri.push_str(&pairs.join("&"));
        }

        let mut request = http::Request::new(self.body);
        *request.method_mut() =
            http::Method::from_bytes(self.method.as_str().as_bytes()).unwrap_or(http::Method::GET);
        *request.uri_mut() = uri.parse().unwrap_or_else(|_| http::Uri::from_static("/"));
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(&value),
            ) {
                request.headers_mut().insert(name, value);
            }
        }
        request
    }
}

fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Response from a test request
#[derive(Debug, Clone)]
pub struct TestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl TestResponse {
    pub fn from_http(response: http::Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        Self {
            status: parts.status.as_u16(),
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Header lookup, case-insensitive
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TestRequestBuilder::new(HttpMethod::POST, "/things")
            .query("$method", "PUT")
            .form(&[("name", "a b")])
            .build();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().query(), Some("%24method=PUT"));
        assert_eq!(request.body().as_ref(), b"name=a+b");
        assert_eq!(
            request.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_response_header_lookup() {
        let response = TestResponse::from_http(
            http::Response::builder()
                .status(201)
                .header("X-Thing", "yes")
                .body(Bytes::from_static(b"{\"ok\":true}"))
                .unwrap(),
        );
        assert_eq!(response.status(), 201);
        assert_eq!(response.header("x-thing"), Some("yes"));
        let json: serde_json::Value = response.body_json().unwrap();
        assert_eq!(json["ok"], true);
    }
}
