//! Application assembly.
//!
//! [`make_app`] reads the `factory` setting and hands the settings to that
//! [`ApplicationFactory`]. The default factory calls
//! [`Application::assemble`], which resolves every configured object, runs
//! configuration hooks through a [`Configurator`], mounts static
//! directories and resources, and finally freezes the handler chain.
//!
//! ```ignore
//! let settings = Settings::builder()
//!     .ini("app.ini", "[app]\npackage = myapp\n")?
//!     .build()?;
//! let app = trellis_core::make_app(settings)?;
//! ```

use crate::chain::{Chain, Handler, HandlerLine, HandlerSpec, Placement, SYSTEM_HANDLERS};
use crate::csrf::CsrfConfig;
use crate::error::{Error, LifecycleError, Result};
use crate::events::{ApplicationCreated, CreatedSubscriber};
use crate::factory::{
    ApplicationFactory, ConfigHook, ExcLogMessage, Helpers, RequestFactory, ResponseFactory,
};
use crate::handlers::CorsConfig;
use crate::http::HttpMethod;
use crate::logging::{debug, info, warn};
use crate::representation::{Encoder, EncoderDefault, Representation, Representations};
use crate::resolver::{ModuleLoader, Object, Registry, Resolver};
use crate::resource::{MountedResource, Resource, ResourceLine};
use crate::static_files::StaticDirectory;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use trellis_config::{ConfigError, ObjectRef, Settings};
use trellis_events::{Event, EventMetadata, Notifier, OnceFlag, SubscriberError};

/// Build an application using the registry of built-in and exported modules
pub fn make_app(settings: Settings) -> Result<Application> {
    make_app_with(settings, Registry::new())
}

/// Build an application resolving objects through `loader`.
///
/// The loader must provide the `trellis.*` modules for any default left in
/// place; [`Registry::new`] does.
pub fn make_app_with(settings: Settings, loader: impl ModuleLoader + 'static) -> Result<Application> {
    let resolver = Arc::new(Resolver::new(loader));
    let factory: Arc<dyn ApplicationFactory> = resolve_setting(&resolver, &settings, "factory")?;
    factory.create(settings, resolver)
}

/// Load settings from a file (INI, TOML or JSON) and build the application
pub fn make_app_from_file(path: &str) -> Result<Application> {
    let settings = Settings::builder().file(path)?.build()?;
    make_app(settings)
}

fn resolve_setting<T: Any + Clone>(resolver: &Resolver, settings: &Settings, key: &str) -> Result<T> {
    resolve_optional(resolver, settings, key)?
        .ok_or_else(|| Error::startup(key, "", ConfigError::KeyNotFound(key.to_string())))
}

fn resolve_optional<T: Any + Clone>(resolver: &Resolver, settings: &Settings, key: &str) -> Result<Option<T>> {
    let Some(reference) = settings.get_ref(key).map_err(|e| Error::startup(key, "", e))? else {
        return Ok(None);
    };
    resolver
        .resolve_ref_as::<T>(&reference, settings.package())
        .map(Some)
        .map_err(|e| Error::startup(key, reference.as_str(), e))
}

/// Setup-phase view of the application under construction.
///
/// Configuration hooks receive a `&mut Configurator`; everything added here
/// is frozen into the [`Application`] once assembly finishes.
pub struct Configurator {
    settings: Settings,
    resolver: Arc<Resolver>,
    notifier: Notifier,
    handlers: Vec<HandlerSpec>,
    resources: Vec<MountedResource>,
    static_directories: Vec<StaticDirectory>,
    representations: Representations,
    helpers: Helpers,
    included: HashSet<String>,
}

impl Configurator {
    pub fn new(settings: Settings, resolver: Arc<Resolver>) -> Self {
        Self {
            settings,
            resolver,
            notifier: Notifier::new(),
            handlers: Vec::new(),
            resources: Vec::new(),
            static_directories: Vec::new(),
            representations: Representations::default(),
            helpers: Helpers::new(),
            included: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn package(&self) -> Option<&str> {
        self.settings.package()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Add an application handler; chain placement happens at assembly
    pub fn add_handler<H: Handler + 'static>(&mut self, name: &str, handler: H, placement: Placement) -> &mut Self {
        self.handlers.push(HandlerSpec {
            name: name.to_string(),
            reference: std::any::type_name::<H>().to_string(),
            handler: Arc::new(handler),
            placement,
        });
        self
    }

    /// Add a handler from a `tangled.app.handlers` style line
    pub fn add_handler_ref(&mut self, line: &str) -> Result<()> {
        let spec = self.handler_spec(line)?;
        self.handlers.push(spec);
        Ok(())
    }

    fn handler_spec(&self, line: &str) -> Result<HandlerSpec> {
        let parsed = HandlerLine::parse(line)?;
        let handler: Arc<dyn Handler> = self
            .resolver
            .resolve_ref_as(&parsed.reference, self.package())
            .map_err(|e| Error::startup("tangled.app.handlers", parsed.reference.as_str(), e))?;
        Ok(HandlerSpec {
            name: parsed.stage_name(),
            reference: parsed.reference.to_string(),
            handler,
            placement: parsed.placement,
        })
    }

    /// Mount a resource; names must be unique
    pub fn mount_resource<R: Resource + 'static>(
        &mut self,
        name: &str,
        resource: R,
        path: &str,
        methods: &[HttpMethod],
    ) -> Result<&mut Self> {
        self.mount_shared_resource(name, Arc::new(resource), path, methods)
    }

    pub fn mount_shared_resource(
        &mut self,
        name: &str,
        resource: Arc<dyn Resource>,
        path: &str,
        methods: &[HttpMethod],
    ) -> Result<&mut Self> {
        if self.resources.iter().any(|mounted| mounted.name == name) {
            return Err(ConfigError::invalid("tangled.app.resources", "unique resource name", name).into());
        }
        let mounted = MountedResource::new(name, resource, path, methods.to_vec())?;
        debug!(resource = name, path = %mounted.path, "Mounted resource");
        self.resources.push(mounted);
        Ok(self)
    }

    /// Mount a resource from a `name reference /path [METHODS]` line
    pub fn mount_resource_ref(&mut self, line: &str) -> Result<()> {
        let parsed = ResourceLine::parse(line)?;
        let package = self
            .settings
            .get_opt_str("tangled.app.resources.package")?
            .or(self.settings.package());
        let resource: Arc<dyn Resource> = self
            .resolver
            .resolve_ref_as(&parsed.reference, package)
            .map_err(|e| Error::startup("tangled.app.resources", parsed.reference.as_str(), e))?;
        self.mount_shared_resource(&parsed.name, resource, &parsed.path, &parsed.methods)?;
        Ok(())
    }

    /// Serve files under `root` at `/<prefix>/...`
    pub fn mount_static_directory(&mut self, prefix: &str, root: &str) -> Result<&mut Self> {
        self.add_static_directory(StaticDirectory::new(prefix, root))
    }

    fn add_static_directory(&mut self, directory: StaticDirectory) -> Result<&mut Self> {
        if self
            .static_directories
            .iter()
            .any(|existing| existing.prefix() == directory.prefix())
        {
            return Err(ConfigError::invalid(
                "tangled.app.static_directories",
                "unique prefix",
                directory.prefix(),
            )
            .into());
        }
        debug!(prefix = directory.prefix(), root = %directory.root().display(), "Mounted static directory");
        self.static_directories.push(directory);
        Ok(self)
    }

    pub fn add_representation(&mut self, representation: Representation) -> &mut Self {
        self.representations.add(representation);
        self
    }

    pub fn add_helper<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> &mut Self {
        self.helpers.insert(name, value);
        self
    }

    /// Subscribe to any application event
    pub fn on<E, F>(&mut self, callback: F) -> &mut Self
    where
        E: Event,
        F: Fn(&E) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.notifier.on::<E, F>(callback);
        self
    }

    pub fn on_created<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&ApplicationCreated) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.on::<ApplicationCreated, F>(callback)
    }

    /// Run the configuration hook(s) at `reference`.
    ///
    /// A namespace runs every hook it exports, in name order. Each absolute
    /// reference runs at most once per application.
    pub fn include(&mut self, reference: &str) -> Result<()> {
        let parsed = ObjectRef::parse(reference)?;
        self.include_ref("tangled.app.includes", &parsed)
    }

    fn include_ref(&mut self, key: &str, reference: &ObjectRef) -> Result<()> {
        let startup = |e: Error| Error::startup(key, reference.as_str(), e);
        let absolute = reference
            .absolute(self.package())
            .ok_or_else(|| startup(crate::error::ResolutionError::NoPackageContext(reference.to_string()).into()))?;
        if !self.included.insert(absolute.to_string()) {
            debug!(reference = %absolute, "Configuration already included");
            return Ok(());
        }

        let object = self.resolver.resolve_ref(&absolute, None).map_err(|e| startup(e.into()))?;
        let hooks: Vec<ConfigHook> = match &object {
            Object::Namespace(namespace) => {
                let mut members: Vec<(&str, &Object)> = namespace.iter().collect();
                members.sort_by_key(|(name, _)| *name);
                members
                    .into_iter()
                    .filter_map(|(_, member)| member.downcast::<ConfigHook>())
                    .collect()
            }
            _ => vec![crate::resolver::downcast::<ConfigHook>(absolute.as_str(), &object).map_err(|e| startup(e.into()))?],
        };

        debug!(reference = %absolute, hooks = hooks.len(), "Including configuration");
        for hook in hooks {
            hook(self).map_err(startup)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Configurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configurator")
            .field("handlers", &self.handlers)
            .field("resources", &self.resources.len())
            .field("static_directories", &self.static_directories)
            .field("helpers", &self.helpers)
            .finish_non_exhaustive()
    }
}

struct AppInner {
    name: String,
    settings: Settings,
    resolver: Arc<Resolver>,
    notifier: Notifier,
    chain: Chain,
    resources: Vec<MountedResource>,
    static_directories: Vec<StaticDirectory>,
    representations: Representations,
    representation_args: Map<String, Value>,
    helpers: Helpers,
    request_factory: Arc<dyn RequestFactory>,
    response_factory: Arc<dyn ResponseFactory>,
    json_encoder: Arc<dyn Encoder>,
    encoder_default: Option<EncoderDefault>,
    exc_log_message: ExcLogMessage,
    error_resource: Option<Arc<dyn Resource>>,
    csrf: CsrfConfig,
    cors: CorsConfig,
    tunnel_over_post: Vec<HttpMethod>,
    default_content_type: String,
    set_accept_from_ext: bool,
    debug: bool,
    testing: bool,
    created: OnceFlag,
}

/// An assembled application.
///
/// Cheap to clone; all clones share the same frozen configuration.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    /// Assemble an application from settings.
    ///
    /// Order: factories, JSON encoder, includes and `load_config` hooks,
    /// static directories, resources, created subscribers, handler chain.
    pub fn assemble(settings: Settings, resolver: Arc<Resolver>) -> Result<Self> {
        let request_factory: Arc<dyn RequestFactory> =
            resolve_setting(&resolver, &settings, "tangled.app.request_factory")?;
        let response_factory: Arc<dyn ResponseFactory> =
            resolve_setting(&resolver, &settings, "tangled.app.response_factory")?;
        let helpers: Helpers = resolve_setting(&resolver, &settings, "tangled.app.helpers")?;

        let json_encoder: Arc<dyn Encoder> =
            resolve_setting(&resolver, &settings, "tangled.app.representation.json.encoder")?;
        let encoder_default: Option<EncoderDefault> =
            resolve_optional(&resolver, &settings, "tangled.app.representation.json.encoder.default")?;

        let exc_log_message: ExcLogMessage =
            resolve_setting(&resolver, &settings, "tangled.app.exc_log_message_factory")?;
        let error_resource: Option<Arc<dyn Resource>> =
            resolve_optional(&resolver, &settings, "tangled.app.error_resource")?;

        let csrf = CsrfConfig::from_settings(&settings)?;
        let cors = CorsConfig::from_settings(&settings)?;
        if cors.enabled && cors.permissive {
            warn!("CORS is in permissive mode; any origin will be allowed");
        }

        let tunnel_over_post = settings
            .get_list("tangled.app.tunnel_over_post")?
            .iter()
            .map(|name| {
                HttpMethod::from_str(name)
                    .ok_or_else(|| ConfigError::invalid("tangled.app.tunnel_over_post", "HTTP method", name))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut configurator = Configurator::new(settings.clone(), resolver.clone());
        configurator.helpers = helpers;

        // Settings handlers come ahead of those added by hooks
        let mut app_handlers = settings
            .get_list("tangled.app.handlers")?
            .iter()
            .map(|line| configurator.handler_spec(line))
            .collect::<Result<Vec<_>>>()?;

        for key in ["tangled.app.includes", "tangled.app.load_config"] {
            for reference in settings.get_refs(key)? {
                configurator.include_ref(key, &reference)?;
            }
        }

        for line in settings.get_list("tangled.app.static_directories")? {
            configurator.add_static_directory(StaticDirectory::parse(&line)?)?;
        }
        for line in settings.get_list("tangled.app.resources")? {
            configurator.mount_resource_ref(&line)?;
        }

        for reference in settings.get_refs("tangled.app.on_created")? {
            let subscriber: CreatedSubscriber = resolver
                .resolve_ref_as(&reference, settings.package())
                .map_err(|e| Error::startup("tangled.app.on_created", reference.as_str(), e))?;
            configurator
                .notifier
                .on_as(reference.to_string(), move |event: &ApplicationCreated| subscriber(event));
        }

        let system = resolve_system_handlers(&resolver, &settings)?;
        app_handlers.append(&mut configurator.handlers);
        let chain = Chain::assemble(system, app_handlers)?;
        debug!(chain = ?chain.names(), "Assembled handler chain");

        let Configurator {
            notifier,
            resources,
            static_directories,
            representations,
            helpers,
            ..
        } = configurator;

        let app = Self {
            inner: Arc::new(AppInner {
                name: settings.app_str("name")?.to_string(),
                representation_args: settings.get_map("tangled.app.representation.args")?,
                default_content_type: settings.app_str("default_content_type")?.to_string(),
                set_accept_from_ext: settings.app_bool("set_accept_from_ext")?,
                debug: settings.debug(),
                testing: settings.app_bool("testing")?,
                notifier,
                chain,
                resources,
                static_directories,
                representations,
                helpers,
                request_factory,
                response_factory,
                json_encoder,
                encoder_default,
                exc_log_message,
                error_resource,
                csrf,
                cors,
                tunnel_over_post,
                resolver,
                created: OnceFlag::new(),
                settings,
            }),
        };

        if app.settings().app_bool("defer_created")? {
            debug!(app = app.name(), "ApplicationCreated deferred");
        } else {
            app.fire_created()?;
        }
        Ok(app)
    }

    /// Fire [`ApplicationCreated`]; allowed exactly once.
    ///
    /// The application counts as created only once every subscriber has
    /// succeeded. A failed firing leaves it uncreated and may be retried.
    pub fn fire_created(&self) -> Result<()> {
        if !self.inner.created.begin() {
            return Err(LifecycleError::AlreadyFired.into());
        }
        let fired = self.inner.notifier.fire(&ApplicationCreated {
            app: self.clone(),
            metadata: EventMetadata::new(),
        });
        if let Err(err) = fired {
            self.inner.created.abort();
            return Err(err.into());
        }
        self.inner.created.commit();
        info!(
            app = self.name(),
            resources = self.inner.resources.len(),
            handlers = self.inner.chain.len(),
            "Application created"
        );
        Ok(())
    }

    /// Fire an application event to the subscribers registered during setup
    pub fn fire<E: Event>(&self, event: &E) -> Result<()> {
        self.inner.notifier.fire(event)?;
        Ok(())
    }

    /// Whether [`ApplicationCreated`] has been fired
    pub fn is_created(&self) -> bool {
        self.inner.created.is_raised()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn debug(&self) -> bool {
        self.inner.debug
    }

    pub fn testing(&self) -> bool {
        self.inner.testing
    }

    /// Subscriptions belong to the [`Configurator`]; after assembly the
    /// notifier is only fired
    pub(crate) fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn chain(&self) -> &Chain {
        &self.inner.chain
    }

    pub fn resources(&self) -> &[MountedResource] {
        &self.inner.resources
    }

    pub fn resource(&self, name: &str) -> Option<&MountedResource> {
        self.inner.resources.iter().find(|mounted| mounted.name == name)
    }

    /// Build the path of a mounted resource from URL vars
    pub fn resource_path(&self, name: &str, urlvars: &HashMap<String, String>) -> Result<String> {
        self.resource(name)
            .ok_or_else(|| Error::Internal(format!("No resource named {:?}", name)))?
            .format_path(urlvars)
    }

    pub fn static_directories(&self) -> &[StaticDirectory] {
        &self.inner.static_directories
    }

    pub fn representations(&self) -> &Representations {
        &self.inner.representations
    }

    /// Extra renderer args for a content type (`tangled.app.representation.args`)
    pub fn representation_args(&self, content_type: &str) -> Map<String, Value> {
        match self.inner.representation_args.get(content_type) {
            Some(Value::Object(args)) => args.clone(),
            _ => Map::new(),
        }
    }

    pub fn default_content_type(&self) -> &str {
        &self.inner.default_content_type
    }

    pub fn set_accept_from_ext(&self) -> bool {
        self.inner.set_accept_from_ext
    }

    pub fn tunnel_over_post(&self) -> &[HttpMethod] {
        &self.inner.tunnel_over_post
    }

    pub fn helpers(&self) -> &Helpers {
        &self.inner.helpers
    }

    pub fn request_factory(&self) -> &Arc<dyn RequestFactory> {
        &self.inner.request_factory
    }

    pub fn response_factory(&self) -> &Arc<dyn ResponseFactory> {
        &self.inner.response_factory
    }

    pub fn json_encoder(&self) -> &Arc<dyn Encoder> {
        &self.inner.json_encoder
    }

    pub fn encoder_default(&self) -> Option<&EncoderDefault> {
        self.inner.encoder_default.as_ref()
    }

    pub fn exc_log_message(&self) -> &ExcLogMessage {
        &self.inner.exc_log_message
    }

    pub fn error_resource(&self) -> Option<&Arc<dyn Resource>> {
        self.inner.error_resource.as_ref()
    }

    pub fn csrf(&self) -> &CsrfConfig {
        &self.inner.csrf
    }

    pub fn cors(&self) -> &CorsConfig {
        &self.inner.cors
    }
}

fn resolve_system_handlers(resolver: &Resolver, settings: &Settings) -> Result<[Arc<dyn Handler>; 8]> {
    let mut handlers = Vec::with_capacity(SYSTEM_HANDLERS.len());
    for name in SYSTEM_HANDLERS {
        let key = format!("tangled.app.handler.{}", name);
        handlers.push(resolve_setting::<Arc<dyn Handler>>(resolver, settings, &key)?);
    }
    handlers
        .try_into()
        .map_err(|_| Error::Internal("system handler count mismatch".to_string()))
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("debug", &self.inner.debug)
            .field("chain", &self.inner.chain)
            .field("resources", &self.inner.resources)
            .field("static_directories", &self.inner.static_directories)
            .field("created", &self.is_created())
            .finish_non_exhaustive()
    }
}
