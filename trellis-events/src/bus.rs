//! Ordered, synchronous event notifier

use crate::event::{DynSubscriber, Event, Subscriber, SubscriberError, TypedSubscriber};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Fires events to subscribers keyed by event type.
///
/// Subscribers run on the firing thread in subscription order. The first
/// failure stops the firing and is returned to the caller.
#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<DashMap<TypeId, Vec<Arc<dyn DynSubscriber>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type `E`
    pub fn subscribe<E, S>(&self, subscriber: S)
    where
        E: Event,
        S: Subscriber<E> + 'static,
    {
        self.subscribe_as::<E, S>(std::any::type_name::<S>(), subscriber);
    }

    /// Subscribe under an explicit name, used in logs and errors
    pub fn subscribe_as<E, S>(&self, name: impl Into<String>, subscriber: S)
    where
        E: Event,
        S: Subscriber<E> + 'static,
    {
        let name = name.into();
        debug!(
            subscriber = %name,
            event = std::any::type_name::<E>(),
            "Subscribed to event"
        );
        let entry: Arc<dyn DynSubscriber> = Arc::new(TypedSubscriber::<E, S>::new(name, subscriber));
        self.subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(entry);
    }

    /// Subscribe a closure to events of type `E`
    pub fn on<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe_as::<E, F>(std::any::type_name::<F>(), callback);
    }

    /// Subscribe a named closure to events of type `E`
    pub fn on_as<E, F>(&self, name: impl Into<String>, callback: F)
    where
        E: Event,
        F: Fn(&E) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe_as::<E, F>(name, callback);
    }

    /// Fire `event` to every subscriber of its type
    pub fn fire<E: Event>(&self, event: &E) -> Result<(), NotifyError> {
        // Snapshot so subscribers may subscribe while being notified
        let subscribers = match self.subscribers.get(&TypeId::of::<E>()) {
            Some(list) => list.clone(),
            None => {
                trace!(event = event.event_name(), "No subscribers");
                return Ok(());
            }
        };

        trace!(
            event = event.event_name(),
            subscribers = subscribers.len(),
            "Firing event"
        );

        for subscriber in subscribers.iter() {
            if let Err(source) = subscriber.notify_dyn(event) {
                error!(
                    event = event.event_name(),
                    subscriber = subscriber.name(),
                    error = %source,
                    "Subscriber failed"
                );
                return Err(NotifyError::SubscriberFailed {
                    event: event.event_name(),
                    subscriber: subscriber.name().to_string(),
                    source,
                });
            }
        }

        Ok(())
    }

    /// Number of subscribers for `E`
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .get(&TypeId::of::<E>())
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("event_types", &self.subscribers.len())
            .finish()
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Subscriber {subscriber} failed while handling {event}: {source}")]
    SubscriberFailed {
        event: &'static str,
        subscriber: String,
        #[source]
        source: SubscriberError,
    },
}

const LOWERED: u8 = 0;
const RAISING: u8 = 1;
const RAISED: u8 = 2;

/// A flag that can be raised exactly once.
///
/// Raising can be split in two: [`begin`](Self::begin) claims the flag,
/// then [`commit`](Self::commit) raises it or [`abort`](Self::abort)
/// lowers it again so a later attempt can retry.
#[derive(Debug, Default)]
pub struct OnceFlag {
    state: AtomicU8,
}

impl OnceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `false` if it was already raised or claimed.
    pub fn raise(&self) -> bool {
        if !self.begin() {
            return false;
        }
        self.commit();
        true
    }

    /// Claim the flag. Returns `false` if it was already raised or claimed.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(LOWERED, RAISING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn commit(&self) {
        self.state.store(RAISED, Ordering::Release);
    }

    pub fn abort(&self) {
        let _ = self
            .state
            .compare_exchange(RAISING, LOWERED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_raised(&self) -> bool {
        self.state.load(Ordering::Acquire) == RAISED
    }
}
