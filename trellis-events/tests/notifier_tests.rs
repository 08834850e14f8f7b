//! Integration tests for trellis-events

use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use trellis_events::*;

#[derive(Debug)]
struct Created {
    name: String,
}

impl Event for Created {
    fn event_name(&self) -> &'static str {
        "created"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Stopped;

impl Event for Stopped {
    fn event_name(&self) -> &'static str {
        "stopped"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Subscriber<Created> for Recorder {
    fn notify(&self, event: &Created) -> Result<(), SubscriberError> {
        self.seen.lock().push(event.name.clone());
        Ok(())
    }
}

#[test]
fn test_struct_subscriber() {
    let notifier = Notifier::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    notifier.subscribe(Recorder { seen: seen.clone() });

    notifier
        .fire(&Created {
            name: "app".to_string(),
        })
        .unwrap();

    assert_eq!(*seen.lock(), vec!["app".to_string()]);
}

#[test]
fn test_event_types_are_isolated() {
    let notifier = Notifier::new();
    let count = Arc::new(Mutex::new(0));

    let c = count.clone();
    notifier.on(move |_: &Stopped| {
        *c.lock() += 1;
        Ok(())
    });

    notifier
        .fire(&Created {
            name: "ignored".to_string(),
        })
        .unwrap();
    assert_eq!(*count.lock(), 0);

    notifier.fire(&Stopped).unwrap();
    assert_eq!(*count.lock(), 1);
    assert_eq!(notifier.subscriber_count::<Stopped>(), 1);
    assert!(!notifier.has_subscribers::<Created>());
}

#[test]
fn test_clones_share_subscribers() {
    let notifier = Notifier::new();
    let clone = notifier.clone();
    clone.on(|_: &Stopped| Ok(()));
    assert_eq!(notifier.subscriber_count::<Stopped>(), 1);
}

#[test]
fn test_subscribe_during_fire() {
    let notifier = Notifier::new();
    let inner = notifier.clone();
    notifier.on(move |_: &Stopped| {
        inner.on(|_: &Stopped| Ok(()));
        Ok(())
    });

    notifier.fire(&Stopped).unwrap();
    assert_eq!(notifier.subscriber_count::<Stopped>(), 2);
}

#[test]
fn test_error_carries_subscriber_name() {
    let notifier = Notifier::new();
    notifier.on_as("validator", |_: &Stopped| {
        Err(SubscriberError::failed("not allowed"))
    });

    let err = notifier.fire(&Stopped).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("validator"));
    assert!(message.contains("stopped"));
}
