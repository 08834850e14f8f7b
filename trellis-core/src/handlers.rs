//! System handlers.
//!
//! Every application runs the same eight system stages, in this order:
//!
//! ```text
//! exc -> static_files -> tweaker -> notifier -> resource_finder -> csrf -> cors -> main
//! ```
//!
//! Each one can be swapped for another implementation through its
//! `tangled.app.handler.<name>` setting. The csrf and cors stages do
//! nothing unless enabled. [`Timer`] is not a system stage; add it through
//! `tangled.app.handlers` as `trellis.handlers:timer`.

use crate::application::Application;
use crate::chain::{Handler, Outcome};
use crate::error::{DispatchError, Error, Result};
use crate::events::{NewRequest, NewResponse, ResourceFound};
use crate::http::{ErrorInfo, HttpMethod, Request, Response};
use crate::logging::{debug, error, info, warn};
use crate::resource::{Data, MethodConfig, ResourceMatch};
use async_trait::async_trait;
use std::collections::HashMap;
use trellis_config::Settings;
use trellis_events::EventMetadata;

/// Turns failures from downstream stages into error responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcHandler;

impl ExcHandler {
    async fn error_response(&self, app: &Application, request: &mut Request, error: &Error) -> Response {
        let status = error.status_code();
        let debug_500 = app.debug() && status == 500;

        if status > 400 && !debug_500 {
            if let Some(resource) = app.error_resource() {
                match self.render_error_resource(app, request, error, resource.clone()).await {
                    Ok(response) => return response,
                    Err(failure) => {
                        error!(
                            request_id = request.request_id(),
                            error = %failure,
                            "Error resource failed; using the default error response"
                        );
                    }
                }
            }
        }

        let detail = if debug_500 {
            error.to_string()
        } else {
            error.public_detail()
        };
        let mut response = app
            .response_factory()
            .make_response(request, status)
            .with_text(detail);

        if let Error::Dispatch(DispatchError::MethodNotAllowed { allowed, .. }) = error {
            response.set_header("Allow", allowed.join(", "));
        }

        if app.cors().enabled {
            app.cors().apply(request, &mut response);
        }
        response
    }

    /// Re-run `main` with the error resource, then cors when enabled
    async fn render_error_resource(
        &self,
        app: &Application,
        request: &mut Request,
        error: &Error,
        resource: std::sync::Arc<dyn crate::resource::Resource>,
    ) -> Result<Response> {
        let status = error.status_code();
        request.method = HttpMethod::GET;
        request.set_error(ErrorInfo {
            status,
            detail: error.public_detail(),
        });
        request.set_resource(ResourceMatch {
            name: "error_resource".to_string(),
            resource,
            method: HttpMethod::GET,
            urlvars: HashMap::new(),
        });

        let main = app
            .chain()
            .get("main")
            .cloned()
            .ok_or_else(|| Error::Internal("No main stage".to_string()))?;

        let response = match main.handle(app, request).await {
            Outcome::Continue => request
                .take_response()
                .ok_or(Error::Dispatch(DispatchError::NoResponse))?,
            Outcome::Halt(response) => response,
            Outcome::Fail(error) => return Err(error),
        };

        if app.cors().enabled {
            return CorsHandler.on_response(app, request, response).await;
        }
        Ok(response)
    }
}

#[async_trait]
impl Handler for ExcHandler {
    async fn handle(&self, _app: &Application, _request: &mut Request) -> Outcome {
        Outcome::Continue
    }

    async fn on_failure(&self, app: &Application, request: &mut Request, error: Error) -> Result<Response> {
        let message = (app.exc_log_message())(request, &error);
        if error.is_server_error() {
            error!(request_id = request.request_id(), status = error.status_code(), "{}", message);
            if app.settings().get_bool("debug.pdb").unwrap_or(false) {
                debug!("debug.pdb is set; post-mortem debugging is not available");
            }
        } else {
            debug!(request_id = request.request_id(), status = error.status_code(), "{}", message);
        }

        if error.status_code() == 404 && app.debug() && !app.testing() {
            info!("{}", not_found_listing(app, &request.path));
        }

        Ok(self.error_response(app, request, &error).await)
    }
}

/// Table of mounted resources, logged on 404 in debug mode
pub fn not_found_listing(app: &Application, path: &str) -> String {
    let resources = app.resources();
    let mut out = format!("\"{}\" not found; searched:\n\n", path);
    if resources.is_empty() {
        out.push_str("    No resources mounted\n");
        return out;
    }

    let width = resources
        .iter()
        .map(|r| r.name.len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or(4);
    let mut entry = |name: &str, methods: &str, path: &str| {
        out.push_str(&format!("    {:<width$} => {}\n", name, methods, width = width));
        out.push_str(&format!("    {:<width$}    {}\n", "", path, width = width));
    };

    entry("NAME", "METHODS", "/PATH");
    for mounted in resources {
        let allowed = mounted.allowed_methods();
        let mut methods: Vec<&str> = allowed.iter().map(HttpMethod::as_str).collect();
        methods.sort_unstable();
        entry(&mounted.name, &methods.join(", "), &mounted.path);
    }
    out
}

/// Serves files from mounted static directories
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFilesHandler;

#[async_trait]
impl Handler for StaticFilesHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let Some((directory, relative)) = app
            .static_directories()
            .iter()
            .find_map(|dir| dir.strip(&request.path).map(|rel| (dir, rel.to_string())))
        else {
            return Outcome::Continue;
        };

        request.mark_static();
        if !matches!(request.method, HttpMethod::GET | HttpMethod::HEAD) {
            return Outcome::Fail(Error::Dispatch(DispatchError::MethodNotAllowed {
                method: request.method.to_string(),
                path: request.path.clone(),
                allowed: vec!["GET".to_string(), "HEAD".to_string()],
            }));
        }

        debug!(prefix = directory.prefix(), file = %relative, "Serving static file");
        match directory.serve(&relative, request).await {
            Ok(mut response) => {
                if request.method == HttpMethod::HEAD {
                    response.body.clear();
                }
                Outcome::Halt(response)
            }
            Err(error) => Outcome::Fail(error),
        }
    }
}

/// Applies `$method` and `$accept` request parameters and URL extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct TweakerHandler;

impl TweakerHandler {
    fn take_param(request: &mut Request, name: &str) -> Option<String> {
        let from_query = request.remove_query_param(name);
        let from_form = request.remove_form_param(name);
        from_query.or(from_form).filter(|v| !v.is_empty())
    }

    fn tunnel(app: &Application, request: &mut Request, requested: &str) -> Result<()> {
        let method = HttpMethod::from_str(requested)
            .ok_or_else(|| Error::bad_request(format!("Can't tunnel {} over POST", requested)))?;

        if method == HttpMethod::DELETE {
            // The form body is not read for DELETE requests
            let csrf = app.csrf();
            if request.header(&csrf.header_name).is_none() {
                if let Some(token) = request.form_param(&csrf.token_name) {
                    request.set_header(&csrf.header_name, token);
                }
            }
        }

        let allowed = request.method == HttpMethod::POST && app.tunnel_over_post().contains(&method);
        if !allowed && !app.debug() {
            return Err(Error::bad_request(format!("Can't tunnel {} over POST", method)));
        }

        debug!(from = %request.method, to = %method, "Tunnelled request method");
        request.tweaks.tunneled_from = Some(request.method);
        request.method = method;
        Ok(())
    }

    fn accept_from_extension(app: &Application, request: &mut Request) {
        let Some(slash) = request.path.rfind('/') else {
            return;
        };
        let Some(dot) = request.path[slash..].rfind('.').map(|i| slash + i) else {
            return;
        };
        if dot == slash + 1 || dot + 1 == request.path.len() {
            return;
        }

        let extension = &request.path[dot + 1..];
        if let Some(representation) = app.representations().by_extension(extension) {
            request.tweaks.accept = Some(representation.content_type.clone());
            request.path.truncate(dot);
        }
    }
}

#[async_trait]
impl Handler for TweakerHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let method = Self::take_param(request, "$method");
        let accept = Self::take_param(request, "$accept");

        if let Some(method) = method {
            if let Err(error) = Self::tunnel(app, request, &method) {
                return Outcome::Fail(error);
            }
        }

        if let Some(accept) = accept {
            request.tweaks.accept = Some(match app.representations().by_extension(&accept) {
                Some(representation) if !accept.contains('/') => representation.content_type.clone(),
                _ => accept,
            });
        } else if app.set_accept_from_ext() {
            Self::accept_from_extension(app, request);
        }

        Outcome::Continue
    }
}

/// Fires `NewRequest` and `NewResponse`
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifierHandler;

#[async_trait]
impl Handler for NotifierHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        if request.is_static() {
            return Outcome::Continue;
        }
        let event = NewRequest {
            app: app.clone(),
            request: request.info(),
            metadata: EventMetadata::new(),
        };
        Outcome::from_result(app.notifier().fire(&event).map_err(Error::from))
    }

    async fn on_response(&self, app: &Application, request: &mut Request, response: Response) -> Result<Response> {
        if !request.is_static() {
            let event = NewResponse {
                app: app.clone(),
                request: request.info(),
                status: response.status,
                headers: response.headers.clone(),
                metadata: EventMetadata::new(),
            };
            app.notifier().fire(&event)?;
        }
        Ok(response)
    }
}

/// Matches the request against mounted resources
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceFinderHandler;

#[async_trait]
impl Handler for ResourceFinderHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let mut allowed: Vec<HttpMethod> = Vec::new();

        for mounted in app.resources() {
            let Some(urlvars) = mounted.match_path(&request.path) else {
                continue;
            };
            if !mounted.allows(request.method) {
                allowed.extend(mounted.allowed_methods());
                continue;
            }

            debug!(resource = %mounted.name, method = %request.method, "Resource found");
            request.set_resource(ResourceMatch {
                name: mounted.name.clone(),
                resource: mounted.resource().clone(),
                method: request.method,
                urlvars,
            });

            let event = ResourceFound {
                app: app.clone(),
                request: request.info(),
                resource: mounted.name.clone(),
                method: request.method,
                metadata: EventMetadata::new(),
            };
            return Outcome::from_result(app.notifier().fire(&event).map_err(Error::from));
        }

        if allowed.is_empty() {
            return Outcome::Fail(Error::not_found(request.path.clone()));
        }

        // Preflight requests are answered by the cors stage
        if app.cors().enabled && CorsConfig::is_preflight(request) {
            return Outcome::Continue;
        }

        allowed.sort_unstable_by_key(|m| m.as_str());
        allowed.dedup();
        Outcome::Fail(Error::Dispatch(DispatchError::MethodNotAllowed {
            method: request.method.to_string(),
            path: request.path.clone(),
            allowed: allowed.iter().map(|m| m.to_string()).collect(),
        }))
    }
}

/// CORS settings read from `tangled.app.cors.*`
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// Reflect any origin
    pub permissive: bool,
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            enabled: settings.app_bool("cors.enabled")?,
            permissive: settings.app_bool("cors.permissive")?,
            allowed_origins: settings.app_list("cors.allowed_origins")?,
        })
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.permissive || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    pub fn is_preflight(request: &Request) -> bool {
        request.method == HttpMethod::OPTIONS
            && request.header("origin").is_some()
            && request.header("access-control-request-method").is_some()
    }

    /// Reflect the request's origin when it is allowed
    pub fn apply(&self, request: &Request, response: &mut Response) {
        let Some(origin) = request.header("origin") else {
            return;
        };
        if !self.allows(origin) {
            debug!(origin, "Origin not allowed by CORS");
            return;
        }
        response.set_header("Access-Control-Allow-Origin", origin);
        response.set_header("Access-Control-Allow-Credentials", "true");
        response.set_header("Vary", "Origin");
    }
}

/// Adds CORS headers and answers preflight requests
#[derive(Debug, Clone, Copy, Default)]
pub struct CorsHandler;

#[async_trait]
impl Handler for CorsHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let cors = app.cors();
        if !cors.enabled || !CorsConfig::is_preflight(request) {
            return Outcome::Continue;
        }

        let mut methods: Vec<HttpMethod> = app
            .resources()
            .iter()
            .filter(|mounted| mounted.match_path(&request.path).is_some())
            .flat_map(|mounted| mounted.allowed_methods())
            .collect();
        methods.sort_unstable_by_key(|m| m.as_str());
        methods.dedup();

        let mut response = Response::no_content();
        cors.apply(request, &mut response);
        if response.header("access-control-allow-origin").is_some() {
            let methods: Vec<&str> = methods.iter().map(HttpMethod::as_str).collect();
            response.set_header("Access-Control-Allow-Methods", methods.join(", "));
            if let Some(headers) = request.header("access-control-request-headers") {
                response.set_header("Access-Control-Allow-Headers", headers);
            }
            response.set_header("Access-Control-Max-Age", "86400");
        }
        Outcome::Halt(response)
    }

    async fn on_response(&self, app: &Application, request: &mut Request, mut response: Response) -> Result<Response> {
        let cors = app.cors();
        if cors.enabled {
            cors.apply(request, &mut response);
        }
        Ok(response)
    }
}

/// Calls the matched resource and renders its data
#[derive(Debug, Clone, Copy, Default)]
pub struct MainHandler;

impl MainHandler {
    /// Build the response for resource data
    pub fn render(app: &Application, request: &mut Request, config: &MethodConfig, data: Data) -> Result<Response> {
        if let Data::Response(response) = data {
            return Ok(response);
        }

        let default_status = if data.is_none() { 204 } else { 200 };
        let status = config
            .status
            .or_else(|| request.error().map(|e| e.status))
            .unwrap_or(default_status);
        let mut response = app.response_factory().make_response(request, status);
        for (name, value) in &config.headers {
            response.set_header(name, value.clone());
        }

        if data.is_none() {
            return Ok(response);
        }

        let representation = match &config.content_type {
            Some(content_type) => app
                .representations()
                .get(content_type)
                .ok_or_else(|| Error::Dispatch(DispatchError::NotAcceptable(content_type.clone())))?,
            None => app
                .representations()
                .negotiate(request.accept(), app.default_content_type())?,
        };
        request.tweaks.content_type = Some(representation.content_type.clone());

        let mut args = app.representation_args(&representation.content_type);
        args.extend(config.representation_args.clone());

        response.body = representation.render(app, &data, &args)?;
        response.set_header("Content-Type", representation.header_value());
        Ok(response)
    }
}

#[async_trait]
impl Handler for MainHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let Some(found) = request.resource().cloned() else {
            return Outcome::Fail(Error::not_found(request.path.clone()));
        };

        let config = found.resource.config(found.method);
        let data = match found.resource.handle(app, found.method, request).await {
            Ok(data) => data,
            Err(error) => return Outcome::Fail(error),
        };

        match Self::render(app, request, &config, data) {
            Ok(response) => {
                request.set_response(response);
                Outcome::Continue
            }
            Err(error) => Outcome::Fail(error),
        }
    }
}

/// Logs how long each request took
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer;

#[async_trait]
impl Handler for Timer {
    async fn handle(&self, _app: &Application, _request: &mut Request) -> Outcome {
        Outcome::Continue
    }

    async fn on_response(&self, _app: &Application, request: &mut Request, response: Response) -> Result<Response> {
        info!(
            request_id = request.request_id(),
            path = %request.path,
            status = response.status,
            elapsed_ms = request.elapsed().as_secs_f64() * 1000.0,
            "Request timed"
        );
        Ok(response)
    }

    async fn on_failure(&self, _app: &Application, request: &mut Request, error: Error) -> Result<Response> {
        warn!(
            request_id = request.request_id(),
            path = %request.path,
            elapsed_ms = request.elapsed().as_secs_f64() * 1000.0,
            "Request failed"
        );
        Err(error)
    }
}
