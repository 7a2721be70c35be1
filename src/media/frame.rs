//! Parsed elementary-stream frames as produced by the demux/parse stage.
//!
//! Payload bytes are opaque here; strategies only look at `dts_timestamp`.

use std::fmt;

/// Position on the stream clock (seconds in the stream time base).
pub type Timestamp = f64;

/// Frames that become eligible for output at their decode timestamp.
pub trait DecodeTimestamped {
    fn dts_timestamp(&self) -> Timestamp;
}

/// One H.264 access unit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct H264Frame {
    pub pts_timestamp: Timestamp,
    pub dts_timestamp: Timestamp,
    /// Access unit carries an IDR slice
    pub has_idr: bool,
    pub data: Vec<u8>,
}

impl H264Frame {
    pub fn new(dts_timestamp: Timestamp, data: Vec<u8>) -> Self {
        Self {
            pts_timestamp: dts_timestamp,
            dts_timestamp,
            has_idr: false,
            data,
        }
    }
}

impl DecodeTimestamped for H264Frame {
    fn dts_timestamp(&self) -> Timestamp {
        self.dts_timestamp
    }
}

/// One MPEG-2 video picture
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mpeg2VideoFrame {
    pub pts_timestamp: Timestamp,
    pub dts_timestamp: Timestamp,
    pub data: Vec<u8>,
}

impl Mpeg2VideoFrame {
    pub fn new(dts_timestamp: Timestamp, data: Vec<u8>) -> Self {
        Self {
            pts_timestamp: dts_timestamp,
            dts_timestamp,
            data,
        }
    }
}

impl DecodeTimestamped for Mpeg2VideoFrame {
    fn dts_timestamp(&self) -> Timestamp {
        self.dts_timestamp
    }
}

/// One raw AAC frame (ADTS header stripped)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AacFrame {
    pub pts_timestamp: Timestamp,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    /// Frame duration in seconds
    pub duration: f64,
    pub data: Vec<u8>,
}

impl AacFrame {
    pub fn new(pts_timestamp: Timestamp, data: Vec<u8>) -> Self {
        Self {
            pts_timestamp,
            sampling_frequency: 48_000,
            channel_configuration: 2,
            duration: 1024.0 / 48_000.0,
            data,
        }
    }
}

/// Video codecs with their own pending queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Mpeg2Video,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::H264 => "h264",
            Self::Mpeg2Video => "mpeg2video",
        })
    }
}

/// Video frame of either codec, for codec-agnostic entry points
#[derive(Clone, Debug, PartialEq)]
pub enum VideoFrame {
    H264(H264Frame),
    Mpeg2Video(Mpeg2VideoFrame),
}

impl VideoFrame {
    pub fn codec(&self) -> VideoCodec {
        match self {
            Self::H264(_) => VideoCodec::H264,
            Self::Mpeg2Video(_) => VideoCodec::Mpeg2Video,
        }
    }
}

impl DecodeTimestamped for VideoFrame {
    fn dts_timestamp(&self) -> Timestamp {
        match self {
            Self::H264(f) => f.dts_timestamp,
            Self::Mpeg2Video(f) => f.dts_timestamp,
        }
    }
}

impl From<H264Frame> for VideoFrame {
    fn from(frame: H264Frame) -> Self {
        Self::H264(frame)
    }
}

impl From<Mpeg2VideoFrame> for VideoFrame {
    fn from(frame: Mpeg2VideoFrame) -> Self {
        Self::Mpeg2Video(frame)
    }
}
