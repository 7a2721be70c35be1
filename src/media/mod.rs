//! Frame payloads and the bus events that carry them.

pub mod frame;
pub mod stream_events;

pub use frame::{AacFrame, DecodeTimestamped, H264Frame, Mpeg2VideoFrame, Timestamp, VideoCodec, VideoFrame};
pub use stream_events::*;
