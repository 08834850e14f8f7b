//! Event notification for Trellis
//!
//! A [`Notifier`] maps event types to ordered subscriber lists. Firing is
//! synchronous: subscribers run one after another on the caller's thread,
//! and the first failure aborts the firing.
//!
//! ```
//! use std::any::Any;
//! use trellis_events::{Event, Notifier};
//!
//! #[derive(Debug)]
//! struct Started;
//!
//! impl Event for Started {
//!     fn event_name(&self) -> &'static str { "started" }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! let notifier = Notifier::new();
//! notifier.on(|_: &Started| Ok(()));
//! notifier.fire(&Started).unwrap();
//! ```

pub mod bus;
pub mod event;

pub use bus::{Notifier, NotifyError, OnceFlag};
pub use event::{Event, EventMetadata, Subscriber, SubscriberError};
