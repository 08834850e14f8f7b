// Error types for the Trellis pipeline

use http::StatusCode;
use thiserror::Error;
use trellis_config::ConfigError;
use trellis_events::NotifyError;

/// Failures turning an object reference into a live object
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Relative reference {0:?} needs a package context")]
    NoPackageContext(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Attribute {attribute:?} not found in module {module}")]
    AttributeNotFound { module: String, attribute: String },

    #[error("{reference} is a {found}, expected {expected}")]
    TypeMismatch {
        reference: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid object reference {0:?}")]
    InvalidReference(String),
}

/// CSRF check failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("CSRF token missing from request")]
    MissingToken,

    #[error("CSRF cookie missing from request")]
    MissingCookie,

    #[error("CSRF token does not match")]
    TokenMismatch,

    #[error("CSRF token expired")]
    TokenExpired,

    #[error("Invalid CSRF token: {0}")]
    InvalidToken(String),
}

/// Per-request failures, converted into responses by the exc stage
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Acceptable: {0}")]
    NotAcceptable(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("{status}: {detail}")]
    Abort { status: u16, detail: String },

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler chain ended without a response")]
    NoResponse,

    #[error("Finished callbacks failed: {}", .0.join("; "))]
    FinishedCallbacks(Vec<String>),
}

/// Application lifecycle misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("ApplicationCreated has already been fired")]
    AlreadyFired,

    #[error("Application not created yet; ApplicationCreated is deferred")]
    NotCreated,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Forbidden: {0}")]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Startup failed at `{key}` ({reference}): {source}")]
    Startup {
        key: String,
        reference: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Event error: {0}")]
    Event(#[from] NotifyError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap `source` with the setting key and reference that caused it
    pub fn startup(key: impl Into<String>, reference: impl Into<String>, source: impl Into<Error>) -> Self {
        Error::Startup {
            key: key.into(),
            reference: reference.into(),
            source: Box::new(source.into()),
        }
    }

    /// Abort the request with an explicit status
    pub fn abort(status: u16, detail: impl Into<String>) -> Self {
        Error::Dispatch(DispatchError::Abort {
            status,
            detail: detail.into(),
        })
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Error::Dispatch(DispatchError::BadRequest(detail.into()))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Error::Dispatch(DispatchError::NotFound(detail.into()))
    }

    pub fn handler(detail: impl Into<String>) -> Self {
        Error::Dispatch(DispatchError::Handler(detail.into()))
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Dispatch(err) => match err {
                DispatchError::NotFound(_) => StatusCode::NOT_FOUND.as_u16(),
                DispatchError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED.as_u16(),
                DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST.as_u16(),
                DispatchError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE.as_u16(),
                DispatchError::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED.as_u16(),
                DispatchError::Abort { status, .. } => *status,
                DispatchError::Handler(_)
                | DispatchError::NoResponse
                | DispatchError::FinishedCallbacks(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR.as_u16()
                }
            },
            Error::Security(_) => StatusCode::FORBIDDEN.as_u16(),
            Error::Lifecycle(LifecycleError::NotCreated) => StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            Error::Startup { source, .. } => source.status_code(),

            // Default to 500 for everything else
            _ => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Text safe to show to a client
    pub fn public_detail(&self) -> String {
        match self {
            Error::Dispatch(DispatchError::Abort { detail, .. }) => detail.clone(),
            err if err.is_client_error() => err.to_string(),
            err => StatusCode::from_u16(err.status_code())
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Internal Server Error")
                .to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("/x").status_code(), 404);
        assert_eq!(
            Error::Dispatch(DispatchError::MethodNotAllowed {
                method: "PUT".into(),
                path: "/x".into(),
                allowed: vec!["GET".into()],
            })
            .status_code(),
            405
        );
        assert_eq!(Error::abort(418, "teapot").status_code(), 418);
        assert_eq!(Error::from(SecurityError::TokenMismatch).status_code(), 403);
        assert_eq!(Error::from(LifecycleError::NotCreated).status_code(), 503);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_startup_wraps_source() {
        let err = Error::startup(
            "tangled.app.handler.main",
            "trellis.handlers:nope",
            ResolutionError::AttributeNotFound {
                module: "trellis.handlers".into(),
                attribute: "nope".into(),
            },
        );
        let message = err.to_string();
        assert!(message.contains("tangled.app.handler.main"));
        assert!(message.contains("trellis.handlers:nope"));
    }

    #[test]
    fn test_public_detail_hides_server_errors() {
        assert_eq!(
            Error::Internal("db password wrong".into()).public_detail(),
            "Internal Server Error"
        );
        assert_eq!(Error::abort(409, "taken").public_detail(), "taken");
    }
}
