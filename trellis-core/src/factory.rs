//! Object factory: the pluggable pieces an application is built from.
//!
//! Every object named by a setting is looked up through the resolver and
//! downcast to one of the types below. [`register_builtins`] provides the
//! defaults under the `trellis.*` modules.

use crate::application::{Application, Configurator};
use crate::chain::Handler;
use crate::csrf::CsrfHandler;
use crate::error::{Error, Result};
use crate::events::{ApplicationCreated, CreatedSubscriber};
use crate::handlers::{
    CorsHandler, ExcHandler, MainHandler, NotifierHandler, ResourceFinderHandler, StaticFilesHandler, Timer,
    TweakerHandler,
};
use crate::http::{Request, Response};
use crate::representation::{Encoder, EncoderDefault, JsonEncoder};
use crate::resolver::{ModuleBuilder, Object, Registry, Resolver};
use crate::resource::Resource;
use bytes::Bytes;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use trellis_config::Settings;
use trellis_events::SubscriberError;

/// Hook run by `tangled.app.includes` and `tangled.app.load_config`
pub type ConfigHook = Arc<dyn Fn(&mut Configurator) -> Result<()> + Send + Sync>;

/// Formats the log line for a failed request
pub type ExcLogMessage = Arc<dyn Fn(&Request, &Error) -> String + Send + Sync>;

/// Builds the application from settings (`factory`)
pub trait ApplicationFactory: Send + Sync {
    fn create(&self, settings: Settings, resolver: Arc<Resolver>) -> Result<Application>;
}

/// Assembles the standard [`Application`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultApplicationFactory;

impl ApplicationFactory for DefaultApplicationFactory {
    fn create(&self, settings: Settings, resolver: Arc<Resolver>) -> Result<Application> {
        Application::assemble(settings, resolver)
    }
}

/// Builds a [`Request`] from a raw message (`tangled.app.request_factory`)
pub trait RequestFactory: Send + Sync {
    fn make_request(&self, raw: http::Request<Bytes>) -> Result<Request>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRequestFactory;

impl RequestFactory for DefaultRequestFactory {
    fn make_request(&self, raw: http::Request<Bytes>) -> Result<Request> {
        Request::from_http(raw)
    }
}

/// Builds the initial response for a request (`tangled.app.response_factory`)
pub trait ResponseFactory: Send + Sync {
    fn make_response(&self, request: &Request, status: u16) -> Response;
}

/// Tags every response with the request id
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponseFactory;

impl ResponseFactory for DefaultResponseFactory {
    fn make_response(&self, request: &Request, status: u16) -> Response {
        Response::new(status).with_header("X-Request-Id", request.request_id())
    }
}

/// Named objects made available to resources through the application
#[derive(Clone, Default)]
pub struct Helpers {
    entries: BTreeMap<String, Object>,
}

impl Helpers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.entries.insert(name.into(), Object::value(value));
    }

    pub fn insert_object(&mut self, name: impl Into<String>, object: Object) {
        self.entries.insert(name.into(), object);
    }

    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.entries.get(name)?.downcast::<T>()
    }

    pub fn get_ref<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries.get(name)?.downcast_ref::<T>()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Default `tangled.app.exc_log_message_factory`
pub fn exc_log_message(request: &Request, error: &Error) -> String {
    format!(
        "{} {} [{}] failed with {}: {}",
        request.method,
        request.path,
        request.request_id(),
        error.status_code(),
        error
    )
}

/// Typed exports, so registrations read like the settings that use them
impl ModuleBuilder<'_> {
    pub fn handler<H: Handler + 'static>(&mut self, name: &str, handler: H) -> &mut Self {
        self.export(name, Arc::new(handler) as Arc<dyn Handler>)
    }

    pub fn resource<R: Resource + 'static>(&mut self, name: &str, resource: R) -> &mut Self {
        self.export(name, Arc::new(resource) as Arc<dyn Resource>)
    }

    pub fn config_hook<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut Configurator) -> Result<()> + Send + Sync + 'static,
    {
        self.export(name, Arc::new(hook) as ConfigHook)
    }

    pub fn subscriber<F>(&mut self, name: &str, subscriber: F) -> &mut Self
    where
        F: Fn(&ApplicationCreated) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.export(name, Arc::new(subscriber) as CreatedSubscriber)
    }

    pub fn encoder_default<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&(dyn Any + Send + Sync)) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.export(name, Arc::new(hook) as EncoderDefault)
    }

    pub fn exc_log_message<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&Request, &Error) -> String + Send + Sync + 'static,
    {
        self.export(name, Arc::new(hook) as ExcLogMessage)
    }
}

/// Register the built-in `trellis.*` modules
pub fn register_builtins(registry: &mut Registry) {
    registry
        .module("trellis")
        .export("Application", Arc::new(DefaultApplicationFactory) as Arc<dyn ApplicationFactory>);

    registry
        .module("trellis.app")
        .exc_log_message("exc_log_message", exc_log_message);

    registry
        .module("trellis.handlers")
        .handler("exc_handler", ExcHandler)
        .handler("static_files", StaticFilesHandler)
        .handler("tweaker", TweakerHandler)
        .handler("notifier", NotifierHandler)
        .handler("resource_finder", ResourceFinderHandler)
        .handler("cors_handler", CorsHandler)
        .handler("main", MainHandler)
        .handler("timer", Timer);

    registry.module("trellis.csrf").handler("csrf_handler", CsrfHandler);

    registry
        .module("trellis.request")
        .export("Request", Arc::new(DefaultRequestFactory) as Arc<dyn RequestFactory>);

    registry
        .module("trellis.response")
        .export("Response", Arc::new(DefaultResponseFactory) as Arc<dyn ResponseFactory>);

    registry.module("trellis.helpers").export("Helpers", Helpers::new());

    registry
        .module("trellis.representations")
        .export("JsonEncoder", Arc::new(JsonEncoder) as Arc<dyn Encoder>);
}
