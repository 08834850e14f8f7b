//! Integration tests for common Trellis workflows.
//!
//! These tests go through the public facade only: a settings file on
//! disk, objects exported at link time and a real socket.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use trellis::prelude::*;

struct Hello;

#[async_trait]
impl Resource for Hello {
    fn allowed_methods(&self) -> Vec<HttpMethod> {
        vec![HttpMethod::GET, HttpMethod::POST]
    }

    async fn handle(&self, _app: &Application, method: HttpMethod, request: &mut Request) -> Result<Data> {
        let name = request.urlvar("name").unwrap_or("world").to_string();
        Ok(Data::from(serde_json::json!({ "hello": name, "method": method.as_str() })))
    }
}

fn hello() -> Object {
    Object::value(Arc::new(Hello) as Arc<dyn Resource>)
}

trellis::export!("workflow.resources", "Hello", hello);

const SETTINGS: &str = r#"
[app]
package = workflow
tangled.app.name = workflow
tangled.app.resources =
    hello .resources:Hello /hello/{name}
tangled.app.csrf.enabled = false
"#;

fn write_settings(dir: &tempfile::TempDir, text: &str) -> String {
    let path = dir.path().join("app.ini");
    std::fs::write(&path, text).unwrap();
    path.display().to_string()
}

fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::builder().uri(uri).body(Bytes::new()).unwrap()
}

// =============================================================================
// Assembly
// =============================================================================

#[test]
fn test_app_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app_from_file(&write_settings(&dir, SETTINGS)).unwrap();

    assert_eq!(app.name(), "workflow");
    assert!(app.is_created());
    assert!(app.resource("hello").is_some());
    assert_eq!(
        app.chain().names()[..8],
        ["exc", "static_files", "tweaker", "notifier", "resource_finder", "csrf", "cors", "main"]
    );
}

#[test]
fn test_assembly_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(
        &dir,
        &format!("{}tangled.app.handlers = trellis.handlers:timer after=notifier\n", SETTINGS),
    );
    let first = make_app_from_file(&path).unwrap();
    let second = make_app_from_file(&path).unwrap();
    assert_eq!(first.chain().names(), second.chain().names());
    assert_eq!(first.chain().names()[4], "timer");
}

#[test]
fn test_unknown_setting_file_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.yaml");
    std::fs::write(&path, "debug: true").unwrap();
    assert!(matches!(
        make_app_from_file(&path.display().to_string()),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_override_layer_wins() {
    let settings = Settings::builder()
        .ini("base.ini", SETTINGS)
        .unwrap()
        .set("tangled.app.csrf.enabled", "true")
        .build()
        .unwrap();
    assert!(settings.get_bool("tangled.app.csrf.enabled").unwrap());
    let app = make_app(settings).unwrap();
    assert!(app.csrf().enabled);
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_dispatch_exported_resource() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app_from_file(&write_settings(&dir, SETTINGS)).unwrap();

    let response = app.dispatch(get("/hello/trellis")).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, serde_json::json!({ "hello": "trellis", "method": "GET" }));
}

#[tokio::test]
async fn test_tunnelled_put_is_not_allowed_here() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app_from_file(&write_settings(&dir, SETTINGS)).unwrap();

    let request = http::Request::builder()
        .method("POST")
        .uri("/hello/x?$method=PUT")
        .body(Bytes::new())
        .unwrap();
    let response = app.dispatch(request).await;
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "GET, POST");
}

// =============================================================================
// Server
// =============================================================================

#[tokio::test]
async fn test_serve_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app_from_file(&write_settings(&dir, SETTINGS)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve_with_shutdown(app, listener, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello/socket HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"), "unexpected response: {}", raw);
    assert!(raw.contains("\"hello\":\"socket\""));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
