//! AVSYNC - audio-clock driven buffering for elementary-stream playback
//!
//! Parsers publish `*Parsed` frames on an [`EventBus`], a buffering strategy
//! decides when each one is re-published as `*Emitted` for the renderer.

// Core runtime (events, timers)
pub mod core;

pub mod buffering;
pub mod config;
pub mod media;

// Re-export commonly used types
pub use buffering::{AudioBasedThrottling, BufferingStrategy, PassThrough, StrategyKind};
pub use config::{StrategyConfig, ThrottlingOptions};
pub use crate::core::event_bus::{downcast_event, BoxedEvent, EventBus, EventEmitter, SubscriptionId};
pub use crate::core::timer::{ManualTimer, Timer, TimerThread};
pub use media::{AacFrame, H264Frame, Mpeg2VideoFrame, Timestamp, VideoCodec, VideoFrame};
