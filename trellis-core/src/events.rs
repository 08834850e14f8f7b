//! Lifecycle and per-request events.

use crate::application::Application;
use crate::http::{HttpMethod, RequestInfo};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_events::{Event, EventMetadata, SubscriberError};

/// Subscriber type accepted by `tangled.app.on_created`
pub type CreatedSubscriber = Arc<dyn Fn(&ApplicationCreated) -> Result<(), SubscriberError> + Send + Sync>;

macro_rules! impl_event {
    ($ty:ty, $name:expr) => {
        impl Event for $ty {
            fn event_name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// Fired once, after the application is fully assembled
#[derive(Debug, Clone)]
pub struct ApplicationCreated {
    pub app: Application,
    pub metadata: EventMetadata,
}

/// Fired by the notifier stage before downstream stages run
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub app: Application,
    pub request: Arc<RequestInfo>,
    pub metadata: EventMetadata,
}

/// Fired when a resource matched the request
#[derive(Debug, Clone)]
pub struct ResourceFound {
    pub app: Application,
    pub request: Arc<RequestInfo>,
    pub resource: String,
    pub method: HttpMethod,
    pub metadata: EventMetadata,
}

/// Fired by the notifier stage once downstream produced a response
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub app: Application,
    pub request: Arc<RequestInfo>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub metadata: EventMetadata,
}

impl_event!(ApplicationCreated, "application_created");
impl_event!(NewRequest, "new_request");
impl_event!(ResourceFound, "resource_found");
impl_event!(NewResponse, "new_response");
