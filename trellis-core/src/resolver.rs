//! Object resolution.
//!
//! Settings address components as strings (`module.path:attribute`). The
//! [`Resolver`] turns those strings into live [`Object`]s by asking a
//! [`ModuleLoader`] for the module and walking the attribute path through
//! nested namespaces. Results are cached per absolute reference, so every
//! lookup of the same reference yields the same `Arc`.
//!
//! The default loader is a [`Registry`]. Modules are registered explicitly:
//!
//! ```
//! use trellis_core::resolver::{Object, Registry, Resolver};
//!
//! let mut registry = Registry::empty();
//! registry.module("myapp.models").export("User", "user model");
//!
//! let resolver = Resolver::new(registry);
//! let user: &'static str = resolver.resolve_as("myapp.models:User", None).unwrap();
//! assert_eq!(user, "user model");
//! ```
//!
//! or collected at link time with [`export!`](crate::export).

use crate::error::ResolutionError;
use crate::logging::{debug, trace};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use trellis_config::ObjectRef;

/// A loaded object: either a namespace of further objects or a value
#[derive(Clone)]
pub enum Object {
    Namespace(Arc<Namespace>),
    Value {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
}

impl Object {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Object::Value {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn namespace(namespace: Namespace) -> Self {
        Object::Namespace(Arc::new(namespace))
    }

    /// Borrow the inner value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Object::Value { value, .. } => value.downcast_ref::<T>(),
            Object::Namespace(_) => None,
        }
    }

    /// Clone the inner value out as `T`
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    pub fn as_namespace(&self) -> Option<&Arc<Namespace>> {
        match self {
            Object::Namespace(ns) => Some(ns),
            Object::Value { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Namespace(_) => "namespace",
            Object::Value { type_name, .. } => type_name,
        }
    }

    /// Whether both handles point at the same allocation
    pub fn same(a: &Object, b: &Object) -> bool {
        match (a, b) {
            (Object::Namespace(x), Object::Namespace(y)) => Arc::ptr_eq(x, y),
            (Object::Value { value: x, .. }, Object::Value { value: y, .. }) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Namespace(ns) => f.debug_tuple("Namespace").field(&ns.name).finish(),
            Object::Value { type_name, .. } => f.debug_tuple("Value").field(type_name).finish(),
        }
    }
}

/// A named collection of objects
#[derive(Clone, Default)]
pub struct Namespace {
    name: String,
    members: BTreeMap<String, Object>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Object> {
        self.members.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, object: Object) {
        self.members.insert(name.into(), object);
    }

    /// Members in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Loads modules by dotted path
pub trait ModuleLoader: Send + Sync {
    fn load_module(&self, path: &str) -> Option<Arc<Namespace>>;
}

/// Link-time export collected through `inventory`
pub struct ExportEntry {
    pub module: &'static str,
    pub name: &'static str,
    pub make: fn() -> Object,
}

inventory::collect!(ExportEntry);

/// Export an object from a module at link time.
///
/// ```ignore
/// fn users() -> Object {
///     Object::value(Arc::new(Users) as Arc<dyn Resource>)
/// }
///
/// trellis_core::export!("myapp.resources", "Users", users);
/// ```
#[macro_export]
macro_rules! export {
    ($module:expr, $name:expr, $make:path) => {
        $crate::inventory::submit! {
            $crate::resolver::ExportEntry {
                module: $module,
                name: $name,
                make: $make,
            }
        }
    };
}

/// The default [`ModuleLoader`]: modules registered in memory
#[derive(Clone, Default)]
pub struct Registry {
    modules: HashMap<String, Arc<Namespace>>,
}

impl Registry {
    /// Registry with no modules at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `trellis.*` modules and every
    /// link-time export
    pub fn new() -> Self {
        let mut registry = Self::empty();
        crate::factory::register_builtins(&mut registry);
        registry.collect_exports();
        registry
    }

    /// Add every `export!`ed object
    pub fn collect_exports(&mut self) {
        for entry in inventory::iter::<ExportEntry> {
            trace!(module = entry.module, name = entry.name, "Collecting export");
            self.module(entry.module).export_object(entry.name, (entry.make)());
        }
    }

    /// Open (creating if needed) the module at `path` for registration
    pub fn module(&mut self, path: &str) -> ModuleBuilder<'_> {
        let namespace = self
            .modules
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(path)));
        ModuleBuilder {
            namespace: Arc::make_mut(namespace),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ModuleLoader for Registry {
    fn load_module(&self, path: &str) -> Option<Arc<Namespace>> {
        self.modules.get(path).cloned()
    }
}

/// Mutable handle on a registered module
pub struct ModuleBuilder<'a> {
    namespace: &'a mut Namespace,
}

impl ModuleBuilder<'_> {
    /// Export any value under `name`
    pub fn export<T: Any + Send + Sync>(&mut self, name: &str, value: T) -> &mut Self {
        self.export_object(name, Object::value(value))
    }

    pub fn export_object(&mut self, name: &str, object: Object) -> &mut Self {
        self.namespace.insert(name, object);
        self
    }

    /// Export a nested namespace, filled in by `build`
    pub fn namespace<F>(&mut self, name: &str, build: F) -> &mut Self
    where
        F: FnOnce(&mut ModuleBuilder<'_>),
    {
        let mut nested = Namespace::new(format!("{}.{}", self.namespace.name(), name));
        build(&mut ModuleBuilder {
            namespace: &mut nested,
        });
        self.export_object(name, Object::namespace(nested))
    }
}

/// Resolves references through a loader, caching every result
pub struct Resolver {
    loader: Arc<dyn ModuleLoader>,
    cache: RwLock<HashMap<String, Object>>,
}

impl Resolver {
    pub fn new(loader: impl ModuleLoader + 'static) -> Self {
        Self::with_loader(Arc::new(loader))
    }

    pub fn with_loader(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a reference string
    pub fn resolve(&self, reference: &str, package: Option<&str>) -> Result<Object, ResolutionError> {
        let parsed = ObjectRef::parse(reference)
            .map_err(|_| ResolutionError::InvalidReference(reference.to_string()))?;
        self.resolve_ref(&parsed, package)
    }

    /// Resolve an already parsed reference
    pub fn resolve_ref(&self, reference: &ObjectRef, package: Option<&str>) -> Result<Object, ResolutionError> {
        let absolute = reference
            .absolute(package)
            .ok_or_else(|| ResolutionError::NoPackageContext(reference.to_string()))?;
        let key = absolute.as_str();

        if let Some(hit) = self.cache.read().get(key) {
            trace!(reference = key, "Resolver cache hit");
            return Ok(hit.clone());
        }

        let object = self.load(&absolute)?;

        // Another caller may have raced us; keep whichever landed first
        let mut cache = self.cache.write();
        let object = cache.entry(key.to_string()).or_insert(object).clone();
        debug!(reference = key, kind = object.type_name(), "Resolved object");
        Ok(object)
    }

    /// Resolve and downcast to `T`
    pub fn resolve_as<T: Any + Clone>(&self, reference: &str, package: Option<&str>) -> Result<T, ResolutionError> {
        let object = self.resolve(reference, package)?;
        downcast(reference, &object)
    }

    pub fn resolve_ref_as<T: Any + Clone>(
        &self,
        reference: &ObjectRef,
        package: Option<&str>,
    ) -> Result<T, ResolutionError> {
        let object = self.resolve_ref(reference, package)?;
        downcast(reference.as_str(), &object)
    }

    /// Number of cached references
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    fn load(&self, reference: &ObjectRef) -> Result<Object, ResolutionError> {
        let module_path = reference.module();
        let module = self
            .loader
            .load_module(module_path)
            .ok_or_else(|| ResolutionError::ModuleNotFound(module_path.to_string()))?;

        let mut current = Object::Namespace(module);
        for segment in reference.attribute_path() {
            let next = current
                .as_namespace()
                .and_then(|ns| ns.get(segment))
                .cloned()
                .ok_or_else(|| ResolutionError::AttributeNotFound {
                    module: module_path.to_string(),
                    attribute: reference.attribute().unwrap_or(segment).to_string(),
                })?;
            current = next;
        }
        Ok(current)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cached", &self.cached())
            .finish()
    }
}

/// Downcast a resolved object, reporting a mismatch against `reference`
pub fn downcast<T: Any + Clone>(reference: &str, object: &Object) -> Result<T, ResolutionError> {
    object
        .downcast::<T>()
        .ok_or_else(|| ResolutionError::TypeMismatch {
            reference: reference.to_string(),
            expected: std::any::type_name::<T>(),
            found: object.type_name(),
        })
}
