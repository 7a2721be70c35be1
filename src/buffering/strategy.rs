//! Buffering strategy contract and construction-time strategy selection.

use std::sync::Arc;

use enum_dispatch::enum_dispatch;

use crate::config::StrategyConfig;
use crate::core::{EventBus, Timer};

use super::{AudioBasedThrottling, PassThrough};

/// Capability set every buffering strategy exposes.
///
/// A strategy sits between the parse stage and the renderer on one
/// [`EventBus`]: it listens for `*Parsed` events and decides when the
/// matching `*Emitted` events go out.
#[enum_dispatch]
pub trait BufferingStrategy: Send {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Subscribe to `bus`, replacing any previous attachment.
    ///
    /// Attaching twice (to the same or another bus) never causes
    /// duplicate delivery.
    fn attach(&mut self, bus: &EventBus);

    /// Drop all subscriptions. Later emissions from direct calls are no-ops.
    fn detach(&mut self);

    /// Discard buffered state without emitting it.
    fn abort(&mut self);

    fn is_attached(&self) -> bool;
}

/// Strategy selected once at construction time.
#[enum_dispatch(BufferingStrategy)]
pub enum StrategyKind {
    PassThrough,
    AudioBasedThrottling,
}

impl StrategyKind {
    /// Build from config, using the shared timer thread for delayed work.
    pub fn from_config(config: StrategyConfig) -> Self {
        match config {
            StrategyConfig::PassThrough => PassThrough::new().into(),
            StrategyConfig::AudioBased(options) => AudioBasedThrottling::new(options).into(),
        }
    }

    /// Build from config with an injected timer.
    pub fn with_timer(config: StrategyConfig, timer: Arc<dyn Timer>) -> Self {
        match config {
            StrategyConfig::PassThrough => PassThrough::new().into(),
            StrategyConfig::AudioBased(options) => AudioBasedThrottling::with_timer(options, timer).into(),
        }
    }
}

impl std::fmt::Debug for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyKind")
            .field("name", &self.name())
            .field("attached", &self.is_attached())
            .finish()
    }
}
