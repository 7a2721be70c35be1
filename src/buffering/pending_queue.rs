//! Per-codec backlog of video frames waiting for the audio clock.

use std::collections::VecDeque;

use crate::media::{DecodeTimestamped, Timestamp};

/// Frames in arrival order. A frame leaves either through [`release`](Self::release)
/// or [`clear`](Self::clear), never both.
#[derive(Debug, Clone)]
pub struct PendingQueue<F> {
    frames: VecDeque<F>,
}

impl<F> Default for PendingQueue<F> {
    fn default() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }
}

impl<F: DecodeTimestamped> PendingQueue<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: F) {
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Decode timestamp of the oldest queued frame
    pub fn front_dts(&self) -> Option<Timestamp> {
        self.frames.front().map(|f| f.dts_timestamp())
    }

    /// Drop every queued frame, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }

    /// Take frames with `dts_timestamp <= timestamp`, oldest first.
    ///
    /// With `limit`, at most that many eligible frames are taken; the rest stay
    /// queued. Frames left behind keep their relative order.
    pub fn release(&mut self, timestamp: Timestamp, limit: Option<usize>) -> Vec<F> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut released = Vec::new();
        let mut kept = VecDeque::with_capacity(self.frames.len());

        for frame in self.frames.drain(..) {
            if released.len() < limit && timestamp >= frame.dts_timestamp() {
                released.push(frame);
            } else {
                kept.push_back(frame);
            }
        }

        self.frames = kept;
        released
    }
}
