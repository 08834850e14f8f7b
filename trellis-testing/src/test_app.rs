// Test application builder

use crate::{EventRecorder, TestClient};
use trellis_core::config::SettingsBuilder;
use trellis_core::{
    Application, Configurator, Error, Event, Handler, HttpMethod, Registry, Resource, Result, Settings, make_app_with,
};

/// Module the builder registers test objects under
pub const TEST_MODULE: &str = "trellis_testing.app";

/// Application wrapper for integration tests
pub struct TestApp {
    pub app: Application,
}

impl TestApp {
    pub fn new(app: Application) -> Self {
        Self { app }
    }

    /// Build from settings alone, resolving against the built-in registry
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Ok(Self::new(make_app_with(settings, Registry::new())?))
    }

    pub fn client(&self) -> TestClient {
        TestClient::new(self.app.clone())
    }
}

/// Builder for test applications.
///
/// Resources, handlers and hooks added here are exported from
/// [`TEST_MODULE`] and wired in through the matching settings, so the
/// application is assembled exactly as it would be from a settings file.
/// `tangled.app.testing` is on by default.
pub struct TestAppBuilder {
    settings: SettingsBuilder,
    registry: Registry,
    resources: Vec<String>,
    handlers: Vec<String>,
    includes: Vec<String>,
    error: Option<Error>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::builder().set("tangled.app.testing", true),
            registry: Registry::new(),
            resources: Vec::new(),
            handlers: Vec::new(),
            includes: Vec::new(),
            error: None,
        }
    }

    /// Layer an INI document over the defaults
    pub fn ini(mut self, text: &str) -> Self {
        match self.settings.ini("test.ini", text) {
            Ok(settings) => self.settings = settings,
            Err(error) => {
                self.error.get_or_insert(error.into());
                self.settings = Settings::builder();
            }
        }
        self
    }

    pub fn setting(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.settings = self.settings.set(key, value);
        self
    }

    pub fn debug(self, enabled: bool) -> Self {
        self.setting("debug", enabled)
    }

    /// Mount a resource allowing the methods it declares
    pub fn resource<R: Resource + 'static>(self, name: &str, path: &str, resource: R) -> Self {
        self.resource_with_methods(name, path, &[], resource)
    }

    /// Mount a resource restricted to `methods`
    pub fn resource_with_methods<R: Resource + 'static>(
        mut self,
        name: &str,
        path: &str,
        methods: &[HttpMethod],
        resource: R,
    ) -> Self {
        self.registry.module(TEST_MODULE).resource(name, resource);
        let mut line = format!("{} {}:{} {}", name, TEST_MODULE, name, path);
        if !methods.is_empty() {
            let methods: Vec<&str> = methods.iter().map(HttpMethod::as_str).collect();
            line.push(' ');
            line.push_str(&methods.join(","));
        }
        self.resources.push(line);
        self
    }

    /// Add an application handler; `placement` is `""`, `before=<stage>`
    /// or `after=<stage>`
    pub fn handler<H: Handler + 'static>(mut self, name: &str, placement: &str, handler: H) -> Self {
        self.registry.module(TEST_MODULE).handler(name, handler);
        self.handlers
            .push(format!("{}:{} {} name={}", TEST_MODULE, name, placement, name));
        self
    }

    /// Run `hook` while the application is assembled
    pub fn configure<F>(mut self, name: &str, hook: F) -> Self
    where
        F: Fn(&mut Configurator) -> Result<()> + Send + Sync + 'static,
    {
        self.registry.module(TEST_MODULE).config_hook(name, hook);
        self.includes.push(format!("{}:{}", TEST_MODULE, name));
        self
    }

    /// Record every `E` the application fires, starting during assembly
    pub fn record<E: Event + Clone>(self, recorder: &EventRecorder<E>) -> Self {
        let recorder = recorder.clone();
        let name = format!("record_{}", self.includes.len());
        self.configure(&name, move |config| {
            recorder.subscribe(config.notifier());
            Ok(())
        })
    }

    /// Direct access for registering other modules
    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn build(self) -> Result<TestApp> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut settings = self.settings;
        if !self.resources.is_empty() {
            settings = settings.set("tangled.app.resources", self.resources.join("\n"));
        }
        if !self.handlers.is_empty() {
            settings = settings.set("tangled.app.handlers", self.handlers.join("\n"));
        }
        if !self.includes.is_empty() {
            settings = settings.set("tangled.app.includes", self.includes.join(" "));
        }

        let app = make_app_with(settings.build()?, self.registry)?;
        Ok(TestApp::new(app))
    }
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_app_builds() {
        let app = TestAppBuilder::new().build().unwrap();
        assert!(app.app.testing());
        assert!(app.app.is_created());
    }

    #[test]
    fn test_bad_ini_surfaces_on_build() {
        let result = TestAppBuilder::new().ini("[app\nbroken").build();
        assert!(result.is_err());
    }
}
