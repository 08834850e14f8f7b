//! Testing utilities for Trellis applications.
//!
//! - [`TestAppBuilder`] assembles an application from settings plus
//!   in-memory resources, handlers and configuration hooks
//! - [`TestClient`] dispatches requests without a socket and keeps cookies
//! - [`MockResource`] and [`EventRecorder`] record what the pipeline did
//! - `assert_*` helpers give readable failures
//!
//! ```no_run
//! use trellis_testing::*;
//!
//! # tokio_test::block_on(async {
//! let app = TestAppBuilder::new()
//!     .resource("hello", "/hello", MockResource::returning(serde_json::json!({"hello": "world"})))
//!     .build()
//!     .unwrap();
//!
//! let mut client = app.client();
//! let response = client.get("/hello").await;
//! assert_status(&response, 200);
//! assert_json(&response, &serde_json::json!({"hello": "world"}));
//! # });
//! ```

mod assertions;
mod mock;
mod test_app;
mod test_client;

pub use assertions::{
    assert_body_contains, assert_client_error, assert_content_type, assert_header, assert_json, assert_no_header,
    assert_status, assert_success,
};
pub use mock::{CallLog, EventRecorder, MockResource};
pub use test_app::{TEST_MODULE, TestApp, TestAppBuilder};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};
