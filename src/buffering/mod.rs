//! Buffering strategies - decide when parsed frames reach the renderer.
//!
//! - [`PassThrough`]: release everything immediately
//! - [`AudioBasedThrottling`]: hold video until the audio clock reaches its DTS

pub mod audio_based;
pub mod pass_through;
pub mod pending_queue;
pub mod strategy;

pub use audio_based::AudioBasedThrottling;
pub use pass_through::PassThrough;
pub use pending_queue::PendingQueue;
pub use strategy::{BufferingStrategy, StrategyKind};
