//! Strategy configuration.
//!
//! Plain serde structs so embedders can keep strategy settings next to the
//! rest of their player config (JSON in practice).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Options for [`AudioBasedThrottling`](crate::buffering::AudioBasedThrottling).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingOptions {
    /// Latency before the first audio frame is released, in milliseconds
    pub delay: f64,
    /// Release at most one frame per codec per clock tick
    #[serde(alias = "emitFirstFrameOnly")]
    pub emit_first_frame_only: bool,
}

impl Default for ThrottlingOptions {
    fn default() -> Self {
        Self {
            delay: 0.0,
            emit_first_frame_only: false,
        }
    }
}

impl ThrottlingOptions {
    pub fn new(delay_ms: f64, emit_first_frame_only: bool) -> Self {
        Self {
            delay: delay_ms,
            emit_first_frame_only,
        }
        .normalized()
    }

    /// Clamp delay to a finite, non-negative value
    pub fn normalized(self) -> Self {
        let delay = if self.delay.is_finite() { self.delay.max(0.0) } else { 0.0 };
        Self { delay, ..self }
    }

    /// Audio release delay (zero means synchronous).
    ///
    /// Values too large for [`Duration`] saturate at [`Duration::MAX`].
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.normalized().delay / 1000.0).unwrap_or(Duration::MAX)
    }
}

/// Which buffering strategy to build, selected once at construction time.
///
/// ```json
/// { "strategy": "audio_based", "delay": 100, "emit_first_frame_only": true }
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    PassThrough,
    AudioBased(ThrottlingOptions),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::AudioBased(ThrottlingOptions::default())
    }
}

impl StrategyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse buffering strategy config")?;
        Ok(match config {
            Self::AudioBased(options) => Self::AudioBased(options.normalized()),
            other => other,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize buffering strategy config")
    }
}
