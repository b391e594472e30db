//! Services the engine talks to outside of storage.

pub mod notifications;

pub use notifications::{BatchEvent, NotificationSink, sink_from_config};
