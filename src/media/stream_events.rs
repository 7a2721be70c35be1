//! Bus events exchanged between parsers, buffering strategies and the renderer.
//!
//! `*Parsed` events come from the parse stage, `*Emitted` events go to the
//! renderer. Re-tagging a frame means wrapping the same payload in the
//! matching `*Emitted` type.

use std::fmt;

use super::frame::{AacFrame, H264Frame, Mpeg2VideoFrame, Timestamp};

/// Every event kind strategies consume or produce
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    H264Parsed,
    Mpeg2VideoParsed,
    AacParsed,
    H264Emitted,
    Mpeg2VideoEmitted,
    AacEmitted,
    AudioTimestampTick,
    AudioTimestampEnabled,
    AudioTimestampDisabled,
}

impl EventKind {
    /// Stable wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::H264Parsed => "H264_PARSED",
            Self::Mpeg2VideoParsed => "MPEG2VIDEO_PARSED",
            Self::AacParsed => "AAC_PARSED",
            Self::H264Emitted => "H264_EMITTED",
            Self::Mpeg2VideoEmitted => "MPEG2VIDEO_EMITTED",
            Self::AacEmitted => "AAC_EMITTED",
            Self::AudioTimestampTick => "AUDIO_TIMESTAMP_TICK",
            Self::AudioTimestampEnabled => "AUDIO_TIMESTAMP_ENABLED",
            Self::AudioTimestampDisabled => "AUDIO_TIMESTAMP_DISABLED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that know their own kind
pub trait Tagged {
    const KIND: EventKind;

    fn kind(&self) -> EventKind {
        Self::KIND
    }
}

macro_rules! frame_event {
    ($(#[$meta:meta])* $name:ident($frame:ty) => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name(pub $frame);

        impl Tagged for $name {
            const KIND: EventKind = EventKind::$kind;
        }
    };
}

// === Parse stage output ===

frame_event!(H264Parsed(H264Frame) => H264Parsed);
frame_event!(Mpeg2VideoParsed(Mpeg2VideoFrame) => Mpeg2VideoParsed);
frame_event!(AacParsed(AacFrame) => AacParsed);

// === Strategy output ===

frame_event!(
    /// H.264 frame released to the renderer
    H264Emitted(H264Frame) => H264Emitted
);
frame_event!(
    /// MPEG-2 frame released to the renderer
    Mpeg2VideoEmitted(Mpeg2VideoFrame) => Mpeg2VideoEmitted
);
frame_event!(
    /// AAC frame released to the audio sink
    AacEmitted(AacFrame) => AacEmitted
);

impl From<H264Parsed> for H264Emitted {
    fn from(e: H264Parsed) -> Self {
        Self(e.0)
    }
}

impl From<Mpeg2VideoParsed> for Mpeg2VideoEmitted {
    fn from(e: Mpeg2VideoParsed) -> Self {
        Self(e.0)
    }
}

impl From<AacParsed> for AacEmitted {
    fn from(e: AacParsed) -> Self {
        Self(e.0)
    }
}

// === Audio clock ===

/// Current position of the audio clock
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioTimestampTick {
    pub timestamp: Timestamp,
}

impl Tagged for AudioTimestampTick {
    const KIND: EventKind = EventKind::AudioTimestampTick;
}

/// Audio clock is available: video should follow it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioTimestampEnabled;

impl Tagged for AudioTimestampEnabled {
    const KIND: EventKind = EventKind::AudioTimestampEnabled;
}

/// Audio clock is gone: video runs free
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioTimestampDisabled;

impl Tagged for AudioTimestampDisabled {
    const KIND: EventKind = EventKind::AudioTimestampDisabled;
}
