//! Stateless strategy: every parsed frame is released immediately.

use log::debug;

use crate::core::{EventBus, SubscriptionId};
use crate::media::{AacEmitted, AacParsed, H264Emitted, H264Parsed, Mpeg2VideoEmitted, Mpeg2VideoParsed};

use super::strategy::BufferingStrategy;

/// Re-tags `*Parsed` events as `*Emitted` with no clock involvement.
#[derive(Debug, Default)]
pub struct PassThrough {
    attachment: Option<(EventBus, Vec<SubscriptionId>)>,
}

impl PassThrough {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferingStrategy for PassThrough {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn attach(&mut self, bus: &EventBus) {
        self.detach();

        let emitter = bus.emitter();
        let h264 = bus.subscribe::<H264Parsed, _>(move |e| emitter.emit(H264Emitted::from(e.clone())));
        let emitter = bus.emitter();
        let aac = bus.subscribe::<AacParsed, _>(move |e| emitter.emit(AacEmitted::from(e.clone())));
        let emitter = bus.emitter();
        let mpeg2 = bus.subscribe::<Mpeg2VideoParsed, _>(move |e| emitter.emit(Mpeg2VideoEmitted::from(e.clone())));

        self.attachment = Some((bus.clone(), vec![h264, aac, mpeg2]));
        debug!("{}: attached", self.name());
    }

    fn detach(&mut self) {
        if let Some((bus, subscriptions)) = self.attachment.take() {
            for id in subscriptions {
                bus.unsubscribe(id);
            }
            debug!("{}: detached", self.name());
        }
    }

    fn abort(&mut self) {}

    fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }
}

impl Drop for PassThrough {
    fn drop(&mut self) {
        self.detach();
    }
}
