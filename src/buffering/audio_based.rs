//! Audio-clock driven video release.
//!
//! Video frames are held per codec until an [`AudioTimestampTick`] reaches their
//! decode timestamp. The first AAC frame is released once, optionally after a
//! fixed delay, so the audio sink can start the clock that drives everything else.
//!
//! # Clock modes
//!
//! - **Enabled** (default): parsed video is queued and released by ticks.
//! - **Disabled**: parsed video is emitted on arrival. Frames queued before the
//!   switch stay queued until the next tick or [`abort`](BufferingStrategy::abort).
//!
//! # Tick policy
//!
//! Each codec queue is scanned oldest-first. Eligible frames
//! (`tick >= dts_timestamp`) are emitted and removed; with
//! `emit_first_frame_only` at most one frame per codec leaves per tick.
//! Both codecs follow the same cap.
//!
//! # Re-entrancy
//!
//! State is locked only while deciding what to release. Released video goes
//! into an outbox in the same critical section, and the outbox is emitted
//! after the lock is dropped, so handlers of `*Emitted` events may feed the
//! engine again (e.g. publish the next tick) without deadlocking.
//!
//! Only one caller drains the outbox at a time. A tick handled from inside an
//! `*Emitted` handler appends its frames behind the ones still waiting, so
//! delivery order always equals release order, across codecs and nesting.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use crate::config::ThrottlingOptions;
use crate::core::timer::{self, Timer};
use crate::core::{EventBus, EventEmitter, SubscriptionId};
use crate::media::{
    AacEmitted, AacFrame, AacParsed, AudioTimestampDisabled, AudioTimestampEnabled, AudioTimestampTick,
    H264Emitted, H264Frame, H264Parsed, Mpeg2VideoEmitted, Mpeg2VideoFrame, Mpeg2VideoParsed, Timestamp,
    VideoCodec, VideoFrame,
};

use super::pending_queue::PendingQueue;
use super::strategy::BufferingStrategy;

/// Mutable engine state, owned exclusively by one engine.
#[derive(Debug)]
struct ThrottleState {
    buffering_enabled: bool,
    /// One-shot latch: set by the first AAC frame, never cleared
    first_aac_sent: bool,
    h264: PendingQueue<H264Frame>,
    mpeg2video: PendingQueue<Mpeg2VideoFrame>,
    /// Released video not yet emitted, in release order
    outbox: VecDeque<(EventEmitter, VideoFrame)>,
    /// Set while some caller is emitting the outbox
    draining: bool,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            buffering_enabled: true,
            first_aac_sent: false,
            h264: PendingQueue::new(),
            mpeg2video: PendingQueue::new(),
            outbox: VecDeque::new(),
            draining: false,
        }
    }
}

/// Clears the draining flag if a subscriber panics mid-drain.
struct DrainGuard<'a>(&'a Handlers);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}

fn emit_video(frame: VideoFrame, emitter: &EventEmitter) {
    match frame {
        VideoFrame::H264(f) => emitter.emit(H264Emitted(f)),
        VideoFrame::Mpeg2Video(f) => emitter.emit(Mpeg2VideoEmitted(f)),
    }
}

/// Everything the bus callbacks need; cloned into each subscription.
#[derive(Clone)]
struct Handlers {
    options: ThrottlingOptions,
    timer: Arc<dyn Timer>,
    state: Arc<Mutex<ThrottleState>>,
}

impl Handlers {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emit the outbox front to back, unless another call is already doing it.
    fn drain(&self) {
        {
            let mut state = self.lock();
            if state.draining || state.outbox.is_empty() {
                return;
            }
            state.draining = true;
        }

        let _guard = DrainGuard(self);
        loop {
            let (emitter, frame) = {
                let mut state = self.lock();
                match state.outbox.pop_front() {
                    Some(next) => next,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            emit_video(frame, &emitter);
        }
    }

    fn on_video_parsed(&self, frame: VideoFrame, emitter: Option<&EventEmitter>) {
        {
            let mut state = self.lock();
            if state.buffering_enabled {
                match frame {
                    VideoFrame::H264(f) => state.h264.push(f),
                    VideoFrame::Mpeg2Video(f) => state.mpeg2video.push(f),
                }
                return;
            }
            match emitter {
                Some(emitter) => state.outbox.push_back((emitter.clone(), frame)),
                None => return,
            }
        }
        self.drain();
    }

    fn on_audio_parsed(&self, frame: AacFrame, emitter: Option<&EventEmitter>) {
        {
            let mut state = self.lock();
            if state.first_aac_sent {
                return;
            }
            state.first_aac_sent = true;
        }

        let Some(emitter) = emitter else {
            trace!("First AAC frame latched with no bus attached, dropping it");
            return;
        };

        let delay = self.options.delay();
        if delay.is_zero() {
            debug!("Releasing first AAC frame (pts {})", frame.pts_timestamp);
            emitter.emit(AacEmitted(frame));
        } else {
            debug!("Releasing first AAC frame (pts {}) in {}ms", frame.pts_timestamp, delay.as_millis());
            // Bound to the bus attached now; fires even after abort or detach
            let emitter = emitter.clone();
            self.timer.schedule(delay, Box::new(move || emitter.emit(AacEmitted(frame))));
        }
    }

    fn on_clock_tick(&self, timestamp: Timestamp, emitter: Option<&EventEmitter>) {
        let limit = self.options.emit_first_frame_only.then_some(1);
        {
            let mut state = self.lock();
            let h264 = state.h264.release(timestamp, limit);
            let mpeg2video = state.mpeg2video.release(timestamp, limit);
            if h264.is_empty() && mpeg2video.is_empty() {
                return;
            }
            trace!("Tick {}: releasing {} h264, {} mpeg2video frame(s)", timestamp, h264.len(), mpeg2video.len());

            // Released with no bus: gone
            let Some(emitter) = emitter else { return };
            let released = h264
                .into_iter()
                .map(VideoFrame::H264)
                .chain(mpeg2video.into_iter().map(VideoFrame::Mpeg2Video));
            for frame in released {
                state.outbox.push_back((emitter.clone(), frame));
            }
        }
        self.drain();
    }

    fn set_buffering(&self, enabled: bool) {
        let mut state = self.lock();
        if state.buffering_enabled != enabled {
            debug!("Audio clock {}", if enabled { "enabled, buffering video" } else { "disabled, passing video through" });
        }
        state.buffering_enabled = enabled;
    }
}

struct Attachment {
    bus: EventBus,
    subscriptions: Vec<SubscriptionId>,
}

/// Buffering strategy that paces video by the audio clock.
///
/// # Example
/// ```ignore
/// let bus = EventBus::new();
/// let mut sync = AudioBasedThrottling::new(ThrottlingOptions::new(100.0, false));
/// sync.attach(&bus);
///
/// bus.emit(H264Parsed(frame));                           // queued
/// bus.emit(AudioTimestampTick { timestamp: 1.25 });      // released if dts <= 1.25
/// ```
pub struct AudioBasedThrottling {
    handlers: Handlers,
    attachment: Option<Attachment>,
}

impl AudioBasedThrottling {
    /// Create with the process-wide timer thread for delayed audio release.
    pub fn new(options: ThrottlingOptions) -> Self {
        Self::with_timer(options, timer::shared())
    }

    /// Create with an injected timer (e.g. [`ManualTimer`](crate::core::ManualTimer)).
    pub fn with_timer(options: ThrottlingOptions, timer: Arc<dyn Timer>) -> Self {
        Self {
            handlers: Handlers {
                options: options.normalized(),
                timer,
                state: Arc::new(Mutex::new(ThrottleState::default())),
            },
            attachment: None,
        }
    }

    pub fn options(&self) -> ThrottlingOptions {
        self.handlers.options
    }

    fn emitter(&self) -> Option<EventEmitter> {
        self.attachment.as_ref().map(|a| a.bus.emitter())
    }

    // ========== Direct entry points ==========
    //
    // Same handling as the bus subscriptions, for dispatchers that call the
    // engine directly. Emission goes to the attached bus, or nowhere.

    pub fn on_video_parsed(&self, frame: impl Into<VideoFrame>) {
        self.handlers.on_video_parsed(frame.into(), self.emitter().as_ref());
    }

    pub fn on_audio_parsed(&self, frame: AacFrame) {
        self.handlers.on_audio_parsed(frame, self.emitter().as_ref());
    }

    pub fn on_clock_tick(&self, timestamp: Timestamp) {
        self.handlers.on_clock_tick(timestamp, self.emitter().as_ref());
    }

    pub fn on_clock_enabled(&self) {
        self.handlers.set_buffering(true);
    }

    pub fn on_clock_disabled(&self) {
        self.handlers.set_buffering(false);
    }

    // ========== Introspection ==========

    /// Frames waiting for the clock
    pub fn pending_len(&self, codec: VideoCodec) -> usize {
        let state = self.handlers.lock();
        match codec {
            VideoCodec::H264 => state.h264.len(),
            VideoCodec::Mpeg2Video => state.mpeg2video.len(),
        }
    }

    pub fn is_buffering_enabled(&self) -> bool {
        self.handlers.lock().buffering_enabled
    }

    pub fn first_audio_frame_sent(&self) -> bool {
        self.handlers.lock().first_aac_sent
    }
}

impl BufferingStrategy for AudioBasedThrottling {
    fn name(&self) -> &'static str {
        "audio-based-throttling"
    }

    fn attach(&mut self, bus: &EventBus) {
        self.detach();

        let mut subscriptions = Vec::with_capacity(6);

        let (h, em) = (self.handlers.clone(), bus.emitter());
        subscriptions.push(bus.subscribe::<H264Parsed, _>(move |e| {
            h.on_video_parsed(VideoFrame::H264(e.0.clone()), Some(&em))
        }));

        let (h, em) = (self.handlers.clone(), bus.emitter());
        subscriptions.push(bus.subscribe::<AacParsed, _>(move |e| h.on_audio_parsed(e.0.clone(), Some(&em))));

        let (h, em) = (self.handlers.clone(), bus.emitter());
        subscriptions.push(bus.subscribe::<Mpeg2VideoParsed, _>(move |e| {
            h.on_video_parsed(VideoFrame::Mpeg2Video(e.0.clone()), Some(&em))
        }));

        let (h, em) = (self.handlers.clone(), bus.emitter());
        subscriptions.push(bus.subscribe::<AudioTimestampTick, _>(move |e| h.on_clock_tick(e.timestamp, Some(&em))));

        let h = self.handlers.clone();
        subscriptions.push(bus.subscribe::<AudioTimestampEnabled, _>(move |_| h.set_buffering(true)));

        let h = self.handlers.clone();
        subscriptions.push(bus.subscribe::<AudioTimestampDisabled, _>(move |_| h.set_buffering(false)));

        self.attachment = Some(Attachment {
            bus: bus.clone(),
            subscriptions,
        });
        debug!(
            "{}: attached (delay {}ms, emit_first_frame_only {})",
            self.name(),
            self.handlers.options.delay,
            self.handlers.options.emit_first_frame_only
        );
    }

    fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            for id in attachment.subscriptions {
                attachment.bus.unsubscribe(id);
            }
            debug!("{}: detached", self.name());
        }
    }

    fn abort(&mut self) {
        let mut state = self.handlers.lock();
        let h264 = state.h264.clear();
        let mpeg2video = state.mpeg2video.clear();
        debug!("Abort: dropped {} h264, {} mpeg2video pending frame(s)", h264, mpeg2video);
    }

    fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }
}

impl Drop for AudioBasedThrottling {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for AudioBasedThrottling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBasedThrottling")
            .field("options", &self.handlers.options)
            .field("state", &*self.handlers.lock())
            .field("attached", &self.attachment.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTimer, TimerThread};
    use std::time::{Duration, Instant};

    #[derive(Clone, Debug, PartialEq)]
    enum Out {
        H264(f64),
        Mpeg2(f64),
        Aac(Vec<u8>),
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Records every emitted event on `bus` in delivery order
    fn record(bus: &EventBus) -> Arc<Mutex<Vec<Out>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe::<H264Emitted, _>(move |e| s.lock().unwrap().push(Out::H264(e.0.dts_timestamp)));
        let s = Arc::clone(&seen);
        bus.subscribe::<Mpeg2VideoEmitted, _>(move |e| s.lock().unwrap().push(Out::Mpeg2(e.0.dts_timestamp)));
        let s = Arc::clone(&seen);
        bus.subscribe::<AacEmitted, _>(move |e| s.lock().unwrap().push(Out::Aac(e.0.data.clone())));
        seen
    }

    fn take(seen: &Arc<Mutex<Vec<Out>>>) -> Vec<Out> {
        std::mem::take(&mut *seen.lock().unwrap())
    }

    fn setup(options: ThrottlingOptions) -> (EventBus, AudioBasedThrottling, Arc<ManualTimer>, Arc<Mutex<Vec<Out>>>) {
        init_logger();
        let bus = EventBus::new();
        let timer = Arc::new(ManualTimer::new());
        let mut engine = AudioBasedThrottling::with_timer(options, timer.clone());
        engine.attach(&bus);
        let seen = record(&bus);
        (bus, engine, timer, seen)
    }

    fn h264(dts: f64) -> H264Parsed {
        H264Parsed(H264Frame::new(dts, vec![]))
    }

    fn mpeg2(dts: f64) -> Mpeg2VideoParsed {
        Mpeg2VideoParsed(Mpeg2VideoFrame::new(dts, vec![]))
    }

    fn aac(tag: u8) -> AacParsed {
        AacParsed(AacFrame::new(0.0, vec![tag]))
    }

    fn tick(timestamp: f64) -> AudioTimestampTick {
        AudioTimestampTick { timestamp }
    }

    #[test]
    fn test_tick_releases_eligible_frames_in_order() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());
        for dts in [10.0, 20.0, 30.0] {
            bus.emit(h264(dts));
        }
        assert!(take(&seen).is_empty());

        bus.emit(tick(25.0));
        assert_eq!(take(&seen), vec![Out::H264(10.0), Out::H264(20.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);

        bus.emit(tick(30.0));
        assert_eq!(take(&seen), vec![Out::H264(30.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);
    }

    #[test]
    fn test_tick_before_any_dts_releases_nothing() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(h264(10.0));
        bus.emit(mpeg2(10.0));

        bus.emit(tick(9.999));
        assert!(take(&seen).is_empty());
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);
        assert_eq!(engine.pending_len(VideoCodec::Mpeg2Video), 1);
    }

    #[test]
    fn test_emit_first_frame_only_caps_each_tick() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::new(0.0, true));
        for dts in [10.0, 20.0, 30.0] {
            bus.emit(h264(dts));
        }

        bus.emit(tick(25.0));
        assert_eq!(take(&seen), vec![Out::H264(10.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 2);

        bus.emit(tick(25.0));
        assert_eq!(take(&seen), vec![Out::H264(20.0)]);

        bus.emit(tick(25.0));
        assert!(take(&seen).is_empty());
    }

    #[test]
    fn test_emit_first_frame_only_applies_to_both_codecs() {
        let (bus, _engine, _, seen) = setup(ThrottlingOptions::new(0.0, true));
        for dts in [1.0, 2.0] {
            bus.emit(h264(dts));
            bus.emit(mpeg2(dts));
        }

        bus.emit(tick(5.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0), Out::Mpeg2(1.0)]);
        bus.emit(tick(5.0));
        assert_eq!(take(&seen), vec![Out::H264(2.0), Out::Mpeg2(2.0)]);
    }

    #[test]
    fn test_codec_queues_are_independent() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(mpeg2(5.0));
        bus.emit(h264(15.0));
        bus.emit(mpeg2(25.0));

        bus.emit(tick(10.0));
        assert_eq!(take(&seen), vec![Out::Mpeg2(5.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);
        assert_eq!(engine.pending_len(VideoCodec::Mpeg2Video), 1);
    }

    #[test]
    fn test_first_aac_frame_only_once_without_delay() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());

        bus.emit(aac(1));
        // Synchronous: already delivered when emit() returns
        assert_eq!(take(&seen), vec![Out::Aac(vec![1])]);
        assert!(engine.first_audio_frame_sent());

        bus.emit(aac(2));
        bus.emit(aac(3));
        assert!(take(&seen).is_empty());
    }

    #[test]
    fn test_first_aac_frame_delayed() {
        let (bus, _engine, timer, seen) = setup(ThrottlingOptions::new(100.0, false));

        bus.emit(aac(1));
        timer.advance(Duration::from_millis(5));
        bus.emit(aac(2));
        assert!(take(&seen).is_empty());

        timer.advance(Duration::from_millis(94));
        assert!(take(&seen).is_empty());

        timer.advance(Duration::from_millis(1));
        assert_eq!(take(&seen), vec![Out::Aac(vec![1])]);

        timer.advance(Duration::from_secs(10));
        assert!(take(&seen).is_empty());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_delayed_aac_survives_abort_and_detach() {
        let (bus, mut engine, timer, seen) = setup(ThrottlingOptions::new(50.0, false));

        bus.emit(aac(7));
        engine.abort();
        engine.detach();

        timer.advance(Duration::from_millis(50));
        assert_eq!(take(&seen), vec![Out::Aac(vec![7])]);
    }

    #[test]
    fn test_delayed_aac_targets_bus_at_schedule_time() {
        let (bus, mut engine, timer, seen) = setup(ThrottlingOptions::new(20.0, false));
        bus.emit(aac(1));

        let other = EventBus::new();
        let other_seen = record(&other);
        engine.attach(&other);

        timer.advance(Duration::from_millis(20));
        assert_eq!(take(&seen), vec![Out::Aac(vec![1])]);
        assert!(take(&other_seen).is_empty());
    }

    #[test]
    fn test_abort_keeps_audio_latch_and_clock_mode() {
        let (bus, mut engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(aac(1));
        bus.emit(AudioTimestampDisabled);
        take(&seen);

        engine.abort();
        bus.emit(aac(2));
        assert!(take(&seen).is_empty());
        assert!(!engine.is_buffering_enabled());
    }

    #[test]
    fn test_abort_drops_backlog_silently() {
        let (bus, mut engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(h264(1.0));
        bus.emit(h264(2.0));
        bus.emit(mpeg2(1.0));

        engine.abort();
        assert!(take(&seen).is_empty());
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);
        assert_eq!(engine.pending_len(VideoCodec::Mpeg2Video), 0);

        bus.emit(tick(100.0));
        assert!(take(&seen).is_empty());
    }

    #[test]
    fn test_clock_disabled_passes_video_through() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(h264(10.0));
        bus.emit(AudioTimestampDisabled);
        assert!(!engine.is_buffering_enabled());

        // Backlog is not flushed by the switch itself
        assert!(take(&seen).is_empty());

        bus.emit(h264(20.0));
        bus.emit(mpeg2(20.0));
        assert_eq!(take(&seen), vec![Out::H264(20.0), Out::Mpeg2(20.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);

        // Old backlog only leaves on a tick
        bus.emit(tick(10.0));
        assert_eq!(take(&seen), vec![Out::H264(10.0)]);
    }

    #[test]
    fn test_clock_enabled_resumes_queueing() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(AudioTimestampDisabled);
        bus.emit(h264(1.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0)]);

        bus.emit(AudioTimestampEnabled);
        bus.emit(h264(2.0));
        assert!(take(&seen).is_empty());
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);

        bus.emit(tick(2.0));
        assert_eq!(take(&seen), vec![Out::H264(2.0)]);
    }

    #[test]
    fn test_reattach_has_no_duplicate_delivery() {
        let (bus, mut engine, _, seen) = setup(ThrottlingOptions::default());
        engine.attach(&bus);
        assert_eq!(bus.subscriber_count::<H264Parsed>(), 1);
        assert_eq!(bus.subscriber_count::<AudioTimestampTick>(), 1);

        bus.emit(h264(1.0));
        bus.emit(tick(1.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0)]);
    }

    #[test]
    fn test_attach_to_new_bus_leaves_old_one() {
        let (old, mut engine, _, old_seen) = setup(ThrottlingOptions::default());
        let new = EventBus::new();
        let new_seen = record(&new);
        engine.attach(&new);

        assert!(!old.has_subscribers::<H264Parsed>());
        old.emit(h264(1.0));
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);

        new.emit(h264(1.0));
        new.emit(tick(1.0));
        assert_eq!(take(&new_seen), vec![Out::H264(1.0)]);
        assert!(take(&old_seen).is_empty());
    }

    #[test]
    fn test_direct_calls_without_bus_are_silent() {
        init_logger();
        let engine = AudioBasedThrottling::with_timer(ThrottlingOptions::default(), Arc::new(ManualTimer::new()));

        engine.on_video_parsed(H264Frame::new(1.0, vec![]));
        assert_eq!(engine.pending_len(VideoCodec::H264), 1);
        engine.on_clock_tick(5.0);
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);

        engine.on_audio_parsed(AacFrame::new(0.0, vec![]));
        assert!(engine.first_audio_frame_sent());

        engine.on_clock_disabled();
        engine.on_video_parsed(Mpeg2VideoFrame::new(1.0, vec![]));
        assert_eq!(engine.pending_len(VideoCodec::Mpeg2Video), 0);
    }

    #[test]
    fn test_direct_calls_emit_on_attached_bus() {
        let (_bus, engine, _, seen) = setup(ThrottlingOptions::default());
        engine.on_video_parsed(Mpeg2VideoFrame::new(3.0, vec![]));
        engine.on_clock_tick(3.0);
        engine.on_clock_disabled();
        engine.on_video_parsed(H264Frame::new(4.0, vec![]));
        assert_eq!(take(&seen), vec![Out::Mpeg2(3.0), Out::H264(4.0)]);
    }

    #[test]
    fn test_emitted_handler_may_reenter_engine() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::new(0.0, true));
        for dts in [1.0, 2.0, 3.0] {
            bus.emit(h264(dts));
        }

        // Renderer asks for the next frame as soon as one is shown
        let inner = bus.clone();
        let depth = Arc::new(Mutex::new(0));
        let d = Arc::clone(&depth);
        bus.subscribe::<H264Emitted, _>(move |_| {
            let mut depth = d.lock().unwrap();
            if *depth < 5 {
                *depth += 1;
                drop(depth);
                inner.emit(tick(10.0));
            }
        });

        bus.emit(tick(10.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0), Out::H264(2.0), Out::H264(3.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);
    }

    #[test]
    fn test_reentrant_tick_keeps_release_order_across_codecs() {
        let (bus, engine, _, seen) = setup(ThrottlingOptions::new(0.0, true));
        for dts in [1.0, 2.0] {
            bus.emit(h264(dts));
            bus.emit(mpeg2(dts));
        }

        // First shown H.264 frame immediately requests the next tick
        let inner = bus.clone();
        let fired = Arc::new(Mutex::new(false));
        let f = Arc::clone(&fired);
        bus.subscribe::<H264Emitted, _>(move |_| {
            let mut fired = f.lock().unwrap();
            if !*fired {
                *fired = true;
                drop(fired);
                inner.emit(tick(10.0));
            }
        });

        bus.emit(tick(10.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0), Out::Mpeg2(1.0), Out::H264(2.0), Out::Mpeg2(2.0)]);
        assert_eq!(engine.pending_len(VideoCodec::H264), 0);
        assert_eq!(engine.pending_len(VideoCodec::Mpeg2Video), 0);
    }

    #[test]
    fn test_reentrant_passthrough_waits_for_released_frames() {
        let (bus, _engine, _, seen) = setup(ThrottlingOptions::default());
        bus.emit(h264(1.0));
        bus.emit(mpeg2(1.0));

        // Clock drops out while the first released frame is being shown
        let inner = bus.clone();
        let fired = Arc::new(Mutex::new(false));
        let f = Arc::clone(&fired);
        bus.subscribe::<H264Emitted, _>(move |_| {
            let mut fired = f.lock().unwrap();
            if !*fired {
                *fired = true;
                drop(fired);
                inner.emit(AudioTimestampDisabled);
                inner.emit(mpeg2(2.0));
            }
        });

        bus.emit(tick(1.0));
        assert_eq!(take(&seen), vec![Out::H264(1.0), Out::Mpeg2(1.0), Out::Mpeg2(2.0)]);
    }

    #[test]
    fn test_huge_delay_never_fires_and_does_not_panic() {
        let (bus, engine, timer, seen) = setup(ThrottlingOptions::new(f64::MAX, false));

        bus.emit(aac(1));
        assert!(engine.first_audio_frame_sent());
        assert_eq!(timer.pending(), 1);

        timer.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(take(&seen).is_empty());
    }

    #[test]
    fn test_huge_delay_on_timer_thread_does_not_panic() {
        init_logger();
        let bus = EventBus::new();
        let mut engine = AudioBasedThrottling::with_timer(ThrottlingOptions::new(1e22, false), Arc::new(TimerThread::new()));
        engine.attach(&bus);

        let (tx, rx) = crossbeam_channel::unbounded();
        bus.subscribe::<AacEmitted, _>(move |e| {
            let _ = tx.send(e.0.data.clone());
        });

        bus.emit(aac(1));
        assert!(engine.first_audio_frame_sent());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_detached_first_aac_keeps_latch_after_attach() {
        init_logger();
        let timer = Arc::new(ManualTimer::new());
        let mut engine = AudioBasedThrottling::with_timer(ThrottlingOptions::default(), timer.clone());

        engine.on_audio_parsed(AacFrame::new(0.0, vec![1]));
        assert!(engine.first_audio_frame_sent());

        let bus = EventBus::new();
        let seen = record(&bus);
        engine.attach(&bus);

        bus.emit(aac(2));
        assert!(take(&seen).is_empty());
        assert!(engine.first_audio_frame_sent());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_drop_detaches() {
        let (bus, engine, _, _) = setup(ThrottlingOptions::default());
        assert!(bus.has_subscribers::<AacParsed>());
        drop(engine);
        assert!(!bus.has_subscribers::<AacParsed>());
        assert!(!bus.has_subscribers::<AudioTimestampDisabled>());
    }

    #[test]
    fn test_negative_delay_is_synchronous() {
        let (bus, engine, timer, seen) = setup(ThrottlingOptions {
            delay: -20.0,
            emit_first_frame_only: false,
        });
        assert_eq!(engine.options().delay, 0.0);

        bus.emit(aac(1));
        assert_eq!(take(&seen), vec![Out::Aac(vec![1])]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_real_timer_delay() {
        init_logger();
        let bus = EventBus::new();
        let mut engine = AudioBasedThrottling::new(ThrottlingOptions::new(30.0, false));
        engine.attach(&bus);

        let (tx, rx) = crossbeam_channel::unbounded();
        bus.subscribe::<AacEmitted, _>(move |e| {
            let _ = tx.send((Instant::now(), e.0.data.clone()));
        });

        let start = Instant::now();
        bus.emit(aac(1));
        bus.emit(aac(2));

        let (at, data) = rx.recv_timeout(Duration::from_secs(5)).expect("delayed AAC frame");
        assert!(at.duration_since(start) >= Duration::from_millis(30));
        assert_eq!(data, vec![1]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
