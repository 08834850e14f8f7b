// Trellis - a configuration-driven request pipeline for Rust
//
// A settings file names the application's handlers, resources, security
// toggles and lifecycle hooks. Trellis resolves those names into objects,
// assembles the handler chain and runs every request through it.

// Re-export core functionality
pub use trellis_core::*;

pub use trellis_events;

#[cfg(feature = "testing")]
pub use trellis_testing;

/// Everything a typical application needs
pub mod prelude {
    pub use trellis_core::{
        Application, ApplicationCreated, Configurator, Data, Error, Handler, HttpMethod, MethodConfig, NewRequest,
        NewResponse, Object, Outcome, Placement, Registry, Request, Resource, ResourceFound, Response, Result,
        Settings, async_trait, export, make_app, make_app_from_file, make_app_with, serve, serve_with_shutdown,
    };
}
