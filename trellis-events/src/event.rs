//! Event definitions and traits

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;
use uuid::Uuid;

/// Event trait
///
/// Anything fired through a [`Notifier`](crate::Notifier) implements this.
pub trait Event: Send + Sync + Debug + 'static {
    /// Stable name used in logs
    fn event_name(&self) -> &'static str;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Identity and timestamp shared by every event instance
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber failure
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Subscriber failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SubscriberError {
    pub fn failed(message: impl Into<String>) -> Self {
        SubscriberError::Failed(message.into())
    }
}

/// Synchronous event subscriber
pub trait Subscriber<E: Event>: Send + Sync {
    fn notify(&self, event: &E) -> Result<(), SubscriberError>;
}

impl<E, F> Subscriber<E> for F
where
    E: Event,
    F: Fn(&E) -> Result<(), SubscriberError> + Send + Sync,
{
    fn notify(&self, event: &E) -> Result<(), SubscriberError> {
        self(event)
    }
}

/// Type-erased subscriber
pub(crate) trait DynSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn notify_dyn(&self, event: &dyn Event) -> Result<(), SubscriberError>;
}

/// Wrapper binding a typed subscriber to its event type
pub(crate) struct TypedSubscriber<E, S> {
    name: String,
    subscriber: S,
    _phantom: PhantomData<fn(&E)>,
}

impl<E: Event, S: Subscriber<E>> TypedSubscriber<E, S> {
    pub(crate) fn new(name: String, subscriber: S) -> Self {
        Self {
            name,
            subscriber,
            _phantom: PhantomData,
        }
    }
}

impl<E: Event, S: Subscriber<E>> DynSubscriber for TypedSubscriber<E, S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify_dyn(&self, event: &dyn Event) -> Result<(), SubscriberError> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed) => self.subscriber.notify(typed),
            None => Err(SubscriberError::failed(format!(
                "{} received a {} event",
                self.name,
                event.event_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn event_name(&self) -> &'static str {
            "ping"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Pong;

    impl Event for Pong {
        fn event_name(&self) -> &'static str {
            "pong"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_metadata_ids_differ() {
        assert_ne!(EventMetadata::new().id, EventMetadata::new().id);
    }

    fn accept(_: &Ping) -> Result<(), SubscriberError> {
        Ok(())
    }

    #[test]
    fn test_typed_subscriber_rejects_other_events() {
        let sub = TypedSubscriber::<Ping, _>::new("pinger".into(), accept);
        assert!(sub.notify_dyn(&Ping).is_ok());
        assert!(sub.notify_dyn(&Pong).is_err());
    }
}
