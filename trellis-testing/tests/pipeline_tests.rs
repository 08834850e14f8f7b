use serde_json::json;
use trellis_core::{
    Application, ApplicationCreated, Data, Handler, HttpMethod, MethodConfig, NewRequest, NewResponse, Outcome, Request, Resource,
    ResourceFound, Response, Result, async_trait,
};
use trellis_testing::*;

struct Greeting;

#[async_trait]
impl Resource for Greeting {
    async fn handle(&self, _app: &Application, _method: HttpMethod, request: &mut Request) -> Result<Data> {
        let name = request.urlvar("name").unwrap_or("world").to_string();
        Ok(Data::from(json!({ "hello": name })))
    }
}

struct ErrorPage;

#[async_trait]
impl Resource for ErrorPage {
    async fn handle(&self, _app: &Application, _method: HttpMethod, request: &mut Request) -> Result<Data> {
        let error = request.error().cloned();
        Ok(Data::from(json!({
            "status": error.as_ref().map(|e| e.status),
            "detail": error.map(|e| e.detail),
        })))
    }
}

struct Teapot;

#[async_trait]
impl Handler for Teapot {
    async fn handle(&self, _app: &Application, request: &mut Request) -> Outcome {
        if request.header("x-teapot").is_some() {
            return Outcome::Halt(Response::new(418).with_text("I'm a teapot"));
        }
        Outcome::Continue
    }
}

struct Flaky;

#[async_trait]
impl Resource for Flaky {
    async fn handle(&self, _app: &Application, _method: HttpMethod, request: &mut Request) -> Result<Data> {
        request.on_finished(|_, _| Err("audit log unavailable".to_string()));
        Ok(Data::from("done"))
    }
}

fn things() -> MockResource {
    MockResource::returning(json!({"things": []})).with_methods(&[
        HttpMethod::GET,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::DELETE,
    ])
}

#[tokio::test]
async fn test_get_renders_json() {
    let app = TestAppBuilder::new()
        .resource("greeting", "/hello/{name}", Greeting)
        .build()
        .unwrap();
    let mut client = app.client();

    let response = client.get("/hello/bob").await;
    assert_status(&response, 200);
    assert_content_type(&response, "application/json");
    assert_json(&response, &json!({"hello": "bob"}));
    assert!(response.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_extension_selects_representation() {
    let app = TestAppBuilder::new()
        .resource("greeting", "/hello/{name}", Greeting)
        .build()
        .unwrap();
    let mut client = app.client();

    let response = client.get("/hello/bob.txt").await;
    assert_status(&response, 200);
    assert_content_type(&response, "text/plain");
    assert_body_contains(&response, "bob");
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let app = TestAppBuilder::new().build().unwrap();
    let response = app.client().get("/nowhere").await;
    assert_status(&response, 404);
}

#[tokio::test]
async fn test_wrong_method_is_405_with_allow() {
    let app = TestAppBuilder::new()
        .resource_with_methods("things", "/things", &[HttpMethod::GET, HttpMethod::DELETE], things())
        .build()
        .unwrap();

    let response = app.client().put("/things", "{}").await;
    assert_status(&response, 405);
    assert_header(&response, "allow", "DELETE, GET");
}

#[tokio::test]
async fn test_no_data_is_204() {
    let app = TestAppBuilder::new()
        .resource("empty", "/empty", MockResource::empty())
        .build()
        .unwrap();
    let response = app.client().get("/empty").await;
    assert_status(&response, 204);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_method_config_status_and_headers() {
    let created = MockResource::returning(json!({"id": 1}))
        .with_methods(&[HttpMethod::POST])
        .with_config(MethodConfig::default().status(201).header("Location", "/things/1"));
    let app = TestAppBuilder::new()
        .resource("create", "/things", created)
        .build()
        .unwrap();

    let response = app.client().post("/things", "").await;
    assert_status(&response, 201);
    assert_header(&response, "location", "/things/1");
}

#[tokio::test]
async fn test_tunnel_put_over_post() {
    let resource = things();
    let calls = resource.calls();
    let app = TestAppBuilder::new().resource("things", "/things", resource).build().unwrap();
    let mut client = app.client();

    let response = client
        .send(TestRequestBuilder::new(HttpMethod::POST, "/things").query("$method", "PUT"))
        .await;
    assert_status(&response, 200);
    assert!(calls.was_called_with(HttpMethod::PUT));
    assert!(!calls.was_called_with(HttpMethod::POST));
}

#[tokio::test]
async fn test_tunnel_outside_list_rejected() {
    let app = TestAppBuilder::new().resource("things", "/things", things()).build().unwrap();
    let response = app
        .client()
        .send(TestRequestBuilder::new(HttpMethod::POST, "/things").query("$method", "GET"))
        .await;
    assert_status(&response, 400);
    assert_body_contains(&response, "Can't tunnel GET over POST");
}

#[tokio::test]
async fn test_tunnel_over_get_allowed_in_debug() {
    let resource = things();
    let calls = resource.calls();
    let app = TestAppBuilder::new()
        .debug(true)
        .resource("things", "/things", resource)
        .build()
        .unwrap();
    let response = app
        .client()
        .send(TestRequestBuilder::new(HttpMethod::GET, "/things").query("$method", "DELETE"))
        .await;
    assert_status(&response, 200);
    assert!(calls.was_called_with(HttpMethod::DELETE));
}

#[tokio::test]
async fn test_csrf_rejects_missing_token_and_accepts_echo() {
    let resource = things();
    let calls = resource.calls();
    let app = TestAppBuilder::new()
        .setting("tangled.app.csrf.enabled", true)
        .resource("things", "/things", resource)
        .build()
        .unwrap();
    let mut client = app.client();

    let rejected = client.put("/things", "{}").await;
    assert_status(&rejected, 403);
    assert_eq!(calls.count(), 0);

    let minted = client.get("/things").await;
    assert_status(&minted, 200);
    assert!(minted.header("set-cookie").is_some());
    let token = client.cookie("tangled.web.csrf_token").unwrap().to_string();

    let accepted = client
        .send(TestRequestBuilder::new(HttpMethod::PUT, "/things").header("X-CSRFToken", &token))
        .await;
    assert_status(&accepted, 200);
    assert!(calls.was_called_with(HttpMethod::PUT));

    let again = client.get("/things").await;
    assert_no_header(&again, "set-cookie");
}

#[tokio::test]
async fn test_csrf_token_in_form_with_tunnelled_delete() {
    let app = TestAppBuilder::new()
        .setting("tangled.app.csrf.enabled", true)
        .resource("things", "/things", things())
        .build()
        .unwrap();
    let mut client = app.client();
    client.get("/things").await;
    let token = client.cookie("tangled.web.csrf_token").unwrap().to_string();

    let response = client
        .send(
            TestRequestBuilder::new(HttpMethod::POST, "/things")
                .form(&[("$method", "DELETE"), ("tangled.web.csrf_token", &token)]),
        )
        .await;
    assert_status(&response, 200);
}

#[tokio::test]
async fn test_cors_headers_and_preflight() {
    let app = TestAppBuilder::new()
        .setting("tangled.app.cors.enabled", true)
        .setting("tangled.app.cors.allowed_origins", "https://app.example")
        .resource("things", "/things", things())
        .build()
        .unwrap();
    let mut client = app.client();

    let response = client
        .send(TestRequestBuilder::new(HttpMethod::GET, "/things").header("Origin", "https://app.example"))
        .await;
    assert_status(&response, 200);
    assert_header(&response, "access-control-allow-origin", "https://app.example");

    let foreign = client
        .send(TestRequestBuilder::new(HttpMethod::GET, "/things").header("Origin", "https://evil.example"))
        .await;
    assert_no_header(&foreign, "access-control-allow-origin");

    let preflight = client
        .send(
            TestRequestBuilder::new(HttpMethod::OPTIONS, "/things")
                .header("Origin", "https://app.example")
                .header("Access-Control-Request-Method", "PUT"),
        )
        .await;
    assert_status(&preflight, 204);
    assert_header(&preflight, "access-control-allow-methods", "DELETE, GET, POST, PUT");
}

#[tokio::test]
async fn test_events_fire_for_dynamic_requests() {
    let requests = EventRecorder::<NewRequest>::new();
    let found = EventRecorder::<ResourceFound>::new();
    let responses = EventRecorder::<NewResponse>::new();
    let app = TestAppBuilder::new()
        .record(&requests)
        .record(&found)
        .record(&responses)
        .resource("greeting", "/hello/{name}", Greeting)
        .build()
        .unwrap();

    app.client().get("/hello/ann").await;
    assert_eq!(requests.count(), 1);
    assert_eq!(found.last().map(|e| e.resource), Some("greeting".to_string()));
    assert_eq!(responses.last().map(|e| e.status), Some(200));
}

#[tokio::test]
async fn test_error_resource_renders_failures() {
    let mut builder = TestAppBuilder::new()
        .setting("tangled.app.error_resource", format!("{}:oops", TEST_MODULE))
        .resource("teapot", "/teapot", MockResource::failing(418, "short and stout"));
    builder.registry().module(TEST_MODULE).resource("oops", ErrorPage);
    let app = builder.build().unwrap();
    let mut client = app.client();

    let missing = client.get("/missing").await;
    assert_status(&missing, 404);
    assert_json(&missing, &json!({"status": 404, "detail": "Not Found: /missing"}));

    let teapot = client.get("/teapot").await;
    assert_status(&teapot, 418);
    assert_json(&teapot, &json!({"status": 418, "detail": "short and stout"}));
}

#[tokio::test]
async fn test_application_handler_placed_before_main() {
    let resource = things();
    let calls = resource.calls();
    let app = TestAppBuilder::new()
        .handler("teapot", "before=main", Teapot)
        .resource("things", "/things", resource)
        .build()
        .unwrap();
    let names = app.app.chain().names();
    assert_eq!(names[names.len() - 2], "teapot");

    let response = app
        .client()
        .send(TestRequestBuilder::new(HttpMethod::GET, "/things").header("X-Teapot", "1"))
        .await;
    assert_status(&response, 418);
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_failing_finished_callback_is_500() {
    let app = TestAppBuilder::new()
        .resource("flaky", "/flaky", Flaky)
        .build()
        .unwrap();
    let response = app.client().get("/flaky").await;
    assert_status(&response, 500);
}

#[tokio::test]
async fn test_deferred_app_is_503_until_created() {
    let app = TestAppBuilder::new()
        .setting("tangled.app.defer_created", true)
        .resource("greeting", "/hello/{name}", Greeting)
        .build()
        .unwrap();
    let mut client = app.client();

    assert_status(&client.get("/hello/x").await, 503);
    app.app.fire_created().unwrap();
    assert_status(&client.get("/hello/x").await, 200);
}

#[tokio::test]
async fn test_configure_hook_mounts_resource() {
    let app = TestAppBuilder::new()
        .configure("routes", |config| {
            config.mount_resource("greeting", Greeting, "/greet/{name}", &[])?;
            Ok(())
        })
        .build()
        .unwrap();
    let response = app.client().get("/greet/zed").await;
    assert_json(&response, &json!({"hello": "zed"}));
}

#[tokio::test]
async fn test_static_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hi there").unwrap();
    let app = TestAppBuilder::new()
        .setting(
            "tangled.app.static_directories",
            format!("static {}", dir.path().display()),
        )
        .build()
        .unwrap();
    let mut client = app.client();

    let response = client.get("/static/hello.txt").await;
    assert_status(&response, 200);
    assert_eq!(response.body_string(), "hi there");

    assert_status(&client.get("/static/missing.txt").await, 404);
    assert_status(&client.post("/static/hello.txt", "").await, 405);
}

#[tokio::test]
async fn test_deferred_created_is_recorded_once() {
    let created = EventRecorder::<ApplicationCreated>::new();
    let app = TestAppBuilder::new()
        .setting("tangled.app.defer_created", true)
        .record(&created)
        .build()
        .unwrap();
    assert_eq!(created.count(), 0);

    app.app.fire_created().unwrap();
    assert_eq!(created.count(), 1);
    assert!(app.app.fire_created().is_err());
    assert_eq!(created.count(), 1);
}
