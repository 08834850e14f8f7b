//! Static directory serving.
//!
//! A [`StaticDirectory`] maps the first path segment (`/static/...`) to a
//! directory on disk. Files are served with a content type picked from the
//! extension, an `ETag` and a `Last-Modified` header; matching conditional
//! requests get a 304. Paths escaping the directory are refused.

use crate::error::{Error, Result};
use crate::http::{Request, Response};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use trellis_config::ConfigError;

/// Index file tried when a directory is requested
const INDEX_FILE: &str = "index.html";

/// Content type for a file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// A directory mounted under a URL prefix
#[derive(Debug, Clone, PartialEq)]
pub struct StaticDirectory {
    prefix: String,
    root: PathBuf,
}

impl StaticDirectory {
    pub fn new(prefix: impl AsRef<str>, root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_string(),
            root: root.into(),
        }
    }

    /// Parse a `prefix directory` line
    pub fn parse(line: &str) -> std::result::Result<Self, ConfigError> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(root), None) if !prefix.trim_matches('/').is_empty() => {
                Ok(Self::new(prefix, root))
            }
            _ => Err(ConfigError::invalid(
                "tangled.app.static_directories",
                "`prefix directory`",
                line,
            )),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The part of `path` below this prefix, if the first segment matches
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let trimmed = path.trim_start_matches('/');
        let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        (first == self.prefix).then_some(rest)
    }

    /// Serve `relative` from this directory
    pub async fn serve(&self, relative: &str, request: &Request) -> Result<Response> {
        let mut path = self.resolve_path(relative)?;

        if path.is_dir() {
            path = path.join(INDEX_FILE);
        }
        if !path.is_file() {
            return Err(Error::not_found(request.path.clone()));
        }

        self.serve_file(&path, request).await
    }

    async fn serve_file(&self, path: &Path, request: &Request) -> Result<Response> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified = metadata.modified().ok();
        let etag = generate_etag(path, &metadata);

        if request.header("if-none-match") == Some(etag.as_str()) {
            return Ok(Response::not_modified().with_header("ETag", etag));
        }

        if let (Some(modified_time), Some(since)) = (modified, request.header("if-modified-since")) {
            if let Ok(since_time) = httpdate::parse_http_date(since) {
                // HTTP dates have second resolution
                if httpdate::fmt_http_date(modified_time) == httpdate::fmt_http_date(since_time)
                    || modified_time <= since_time
                {
                    return Ok(Response::not_modified().with_header("ETag", etag));
                }
            }
        }

        let content = tokio::fs::read(path).await?;
        let mut response = Response::ok()
            .with_body(content)
            .with_header("Content-Type", content_type_for(path))
            .with_header("ETag", etag);

        if let Some(modified_time) = modified {
            response.set_header("Last-Modified", httpdate::fmt_http_date(modified_time));
        }

        Ok(response)
    }

    fn resolve_path(&self, relative: &str) -> Result<PathBuf> {
        let relative = relative.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            return Err(Error::abort(403, "Access denied"));
        }

        let full_path = self.root.join(relative);
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|_| Error::not_found(format!("Static directory missing: {}", self.root.display())))?;

        match full_path.canonicalize() {
            Ok(canonical) if canonical.starts_with(&canonical_root) => Ok(canonical),
            // Symlinks leading out of the root
            Ok(_) => Err(Error::abort(403, "Access denied")),
            Err(_) => Ok(full_path),
        }
    }
}

fn generate_etag(path: &Path, metadata: &std::fs::Metadata) -> String {
    let mut hasher = DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    metadata.len().hash(&mut hasher);
    if let Ok(modified) = metadata.modified() {
        if let Ok(duration) = modified.duration_since(SystemTime::UNIX_EPOCH) {
            duration.as_secs().hash(&mut hasher);
        }
    }
    format!("\"{:x}\"", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    #[test]
    fn test_parse_line() {
        let dir = StaticDirectory::parse("/static/ ./public").unwrap();
        assert_eq!(dir.prefix(), "static");
        assert_eq!(dir.root(), Path::new("./public"));
        assert!(StaticDirectory::parse("static").is_err());
        assert!(StaticDirectory::parse("/ ./public").is_err());
    }

    #[test]
    fn test_strip_prefix() {
        let dir = StaticDirectory::new("static", "public");
        assert_eq!(dir.strip("/static/css/site.css"), Some("css/site.css"));
        assert_eq!(dir.strip("/static"), Some(""));
        assert_eq!(dir.strip("/statics/x"), None);
        assert_eq!(dir.strip("/api/static"), None);
    }

    #[test]
    fn test_serve_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let mut request = Request::new(HttpMethod::GET, "/static/a.txt");
        request.on_finished(|_, _| Ok(()));
        let dir = StaticDirectory::new("static", "public");
        let serving = dir.serve("a.txt", &request);
        assert_send(&serving);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.css")), "text/css");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_serve_file_and_conditional() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), "hi").unwrap();
        let dir = StaticDirectory::new("static", tmp.path());

        let request = Request::new(HttpMethod::GET, "/static/hello.txt");
        let response = dir.serve("hello.txt", &request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "hi");
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));

        let etag = response.header("etag").unwrap().to_string();
        let request = Request::new(HttpMethod::GET, "/static/hello.txt").with_header("If-None-Match", etag);
        assert_eq!(dir.serve("hello.txt", &request).await.unwrap().status, 304);

        let last_modified = response.header("last-modified").unwrap().to_string();
        let request =
            Request::new(HttpMethod::GET, "/static/hello.txt").with_header("If-Modified-Since", last_modified);
        assert_eq!(dir.serve("hello.txt", &request).await.unwrap().status, 304);
    }

    #[tokio::test]
    async fn test_missing_and_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = StaticDirectory::new("static", tmp.path());
        let request = Request::new(HttpMethod::GET, "/static/nope");

        let err = dir.serve("nope.txt", &request).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = dir.serve("../etc/passwd", &request).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
