// Test assertions for responses

use crate::TestResponse;

/// Assert that a response has a specific status code
#[track_caller]
pub fn assert_status(response: &TestResponse, expected: u16) {
    assert_eq!(
        response.status, expected,
        "Expected status {}, got {} (body: {})",
        expected,
        response.status,
        response.body_string()
    );
}

/// Assert that a response body is JSON equal to `expected`
#[track_caller]
pub fn assert_json(response: &TestResponse, expected: &serde_json::Value) {
    let actual: serde_json::Value = match response.body_json() {
        Ok(value) => value,
        Err(error) => panic!("Response body is not JSON ({}): {}", error, response.body_string()),
    };
    assert_eq!(&actual, expected, "JSON bodies do not match");
}

/// Assert that a response has a specific header value
#[track_caller]
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    let actual = response.header(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}

#[track_caller]
pub fn assert_no_header(response: &TestResponse, key: &str) {
    assert!(
        response.header(key).is_none(),
        "Expected no '{}' header, got {:?}",
        key,
        response.header(key)
    );
}

#[track_caller]
pub fn assert_body_contains(response: &TestResponse, expected: &str) {
    let body = response.body_string();
    assert!(
        body.contains(expected),
        "Expected body to contain '{}', but it didn't. Body: {}",
        expected,
        body
    );
}

/// Assert that the `Content-Type` starts with `expected` (parameters ignored)
#[track_caller]
pub fn assert_content_type(response: &TestResponse, expected: &str) {
    let actual = response.header("content-type").unwrap_or_default();
    assert!(
        actual.split(';').next().map(str::trim) == Some(expected),
        "Expected content type '{}', got '{}'",
        expected,
        actual
    );
}

#[track_caller]
pub fn assert_success(response: &TestResponse) {
    assert!(
        response.is_success(),
        "Expected successful status (2xx), got {}",
        response.status
    );
}

#[track_caller]
pub fn assert_client_error(response: &TestResponse) {
    assert!(
        (400..500).contains(&response.status),
        "Expected client error status (4xx), got {}",
        response.status
    );
}
