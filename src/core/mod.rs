//! Core runtime modules - event delivery and delayed callbacks
//!
//! These modules are the plumbing buffering strategies are attached to,
//! independent of any codec.

pub mod event_bus;
pub mod timer;

// Re-exports for convenience
pub use event_bus::{downcast_event, BoxedEvent, Event, EventBus, EventEmitter, SubscriptionId};
pub use timer::{ManualTimer, Task, Timer, TimerThread};
