//! Core of the Trellis request pipeline.
//!
//! An [`Application`] is assembled from [`Settings`]: objects named in the
//! settings are looked up through the [`Resolver`], resources are mounted
//! by path pattern, and every request runs through an ordered handler
//! [`Chain`] before a [`Representation`] renders the resource's data.

pub mod application;
pub mod chain;
pub mod csrf;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod factory;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod representation;
pub mod resolver;
pub mod resource;
pub mod server;
pub mod static_files;

pub use application::{Application, Configurator, make_app, make_app_from_file, make_app_with};
pub use chain::{Chain, Handler, HandlerLine, HandlerSpec, Outcome, Placement, SYSTEM_HANDLERS};
pub use csrf::{CsrfConfig, CsrfHandler, CsrfToken};
pub use error::*;
pub use events::*;
pub use factory::*;
pub use handlers::{CorsConfig, CorsHandler, ExcHandler, MainHandler, Timer};
pub use crate::http::{ErrorInfo, HttpMethod, Request, RequestInfo, Response, Tweaks};
pub use representation::{Encoder, EncoderDefault, JsonEncoder, Renderer, Representation, Representations};
pub use resolver::{ModuleBuilder, ModuleLoader, Namespace, Object, Registry, Resolver};
pub use resource::{Data, MethodConfig, MountedResource, Resource, ResourceMatch};
pub use server::{serve, serve_with_shutdown};
pub use static_files::StaticDirectory;

pub use trellis_config::{self as config, ConfigError, ObjectRef, Settings};
pub use trellis_events::{self as notify, Event, Notifier, SubscriberError};

// Used by `export!` and `#[async_trait]` resources downstream
pub use async_trait::async_trait;
pub use inventory;
