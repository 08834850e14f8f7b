// Mocks and recorders

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{
    Application, Data, Error, Event, HttpMethod, MethodConfig, Notifier, Request, Resource, Result,
};

/// Records every event of type `E` fired on a notifier
#[derive(Clone)]
pub struct EventRecorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E: Event + Clone> EventRecorder<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe a new recorder to `notifier`
    pub fn attach(notifier: &Notifier) -> Self {
        let recorder = Self::new();
        recorder.subscribe(notifier);
        recorder
    }

    /// Record events fired on `notifier` into this recorder
    pub fn subscribe(&self, notifier: &Notifier) {
        let events = self.events.clone();
        notifier.on_as("trellis_testing::EventRecorder", move |event: &E| {
            events.lock().push(event.clone());
            Ok(())
        });
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn last(&self) -> Option<E> {
        self.events.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<E: Event + Clone> Default for EventRecorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

type Reply = Arc<dyn Fn(HttpMethod, &Request) -> Result<Data> + Send + Sync>;

/// Resource returning a canned reply and recording each call
#[derive(Clone)]
pub struct MockResource {
    methods: Vec<HttpMethod>,
    reply: Reply,
    config: MethodConfig,
    calls: Arc<Mutex<Vec<(HttpMethod, String)>>>,
}

impl MockResource {
    /// Replies to GET with `data`
    pub fn returning(data: serde_json::Value) -> Self {
        Self::with_reply(move |_, _| Ok(Data::Json(data.clone())))
    }

    /// Replies with no data
    pub fn empty() -> Self {
        Self::with_reply(|_, _| Ok(Data::None))
    }

    /// Fails every call with `status`
    pub fn failing(status: u16, detail: &str) -> Self {
        let detail = detail.to_string();
        Self::with_reply(move |_, _| Err(Error::abort(status, detail.clone())))
    }

    pub fn with_reply<F>(reply: F) -> Self
    where
        F: Fn(HttpMethod, &Request) -> Result<Data> + Send + Sync + 'static,
    {
        Self {
            methods: vec![HttpMethod::GET],
            reply: Arc::new(reply),
            config: MethodConfig::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_methods(mut self, methods: &[HttpMethod]) -> Self {
        self.methods = methods.to_vec();
        self
    }

    pub fn with_config(mut self, config: MethodConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared call log; clone it before mounting the resource
    pub fn calls(&self) -> CallLog {
        CallLog(self.calls.clone())
    }
}

#[async_trait]
impl Resource for MockResource {
    fn allowed_methods(&self) -> Vec<HttpMethod> {
        self.methods.clone()
    }

    fn config(&self, _method: HttpMethod) -> MethodConfig {
        self.config.clone()
    }

    async fn handle(&self, _app: &Application, method: HttpMethod, request: &mut Request) -> Result<Data> {
        self.calls.lock().push((method, request.path.clone()));
        (self.reply)(method, request)
    }
}

/// Calls seen by a [`MockResource`]
#[derive(Clone)]
pub struct CallLog(Arc<Mutex<Vec<(HttpMethod, String)>>>);

impl CallLog {
    pub fn count(&self) -> usize {
        self.0.lock().len()
    }

    pub fn was_called_with(&self, method: HttpMethod) -> bool {
        self.0.lock().iter().any(|(m, _)| *m == method)
    }

    pub fn calls(&self) -> Vec<(HttpMethod, String)> {
        self.0.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Ping(u32);

    impl Event for Ping {
        fn event_name(&self) -> &'static str {
            "ping"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_event_recorder() {
        let notifier = Notifier::new();
        let recorder = EventRecorder::<Ping>::attach(&notifier);
        notifier.fire(&Ping(1)).unwrap();
        notifier.fire(&Ping(2)).unwrap();
        assert_eq!(recorder.count(), 2);
        assert_eq!(recorder.last().map(|p| p.0), Some(2));
    }
}
