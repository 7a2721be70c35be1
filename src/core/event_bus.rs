//! Pub/Sub Event Bus connecting decoders, buffering strategies and the renderer.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks (immediate invocation)
//! - emit() invokes callbacks immediately
//! - Buses built with `with_deferred_queue()` also keep emitted events for poll()
//!
//! The deferred queue is opt-in: a plain bus retains nothing after emit()
//! returns, so frame payloads are freed as soon as subscribers are done.
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.
//!
//! Callbacks are snapshotted before they run, so a callback may emit, subscribe
//! or unsubscribe on the same bus (strategies emit `*Emitted` events from inside
//! their `*Parsed` handlers).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use log::warn;
use uuid::Uuid;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Subscribers per event type, in subscription order
type Subscribers = Arc<RwLock<HashMap<TypeId, IndexMap<SubscriptionId, Callback>>>>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Deferred queue, present only on buses that opted in
type Queue = Option<Arc<Mutex<Vec<BoxedEvent>>>>;

/// Handle returned by [`EventBus::subscribe`], used to remove that one callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Pub/Sub Event Bus with optional deferred processing.
///
/// Two modes of operation:
/// 1. Immediate: subscribe() + emit() triggers callbacks instantly
/// 2. Deferred (opt-in via `with_deferred_queue()`): emit() also queues events for poll()
///
/// Both modes work together - callbacks fire immediately, and on a deferred
/// bus events are also available for batch processing via poll().
///
/// Cloning is cheap and yields a handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Subscribers,
    queue: Queue,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &queue_len(&self.queue))
            .finish()
    }
}

impl EventBus {
    /// Immediate-only bus: events are dropped once callbacks return.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: None,
        }
    }

    /// Bus that also queues every emitted event for poll().
    ///
    /// The queue holds at most 1000 events; the oldest half is evicted when full.
    pub fn with_deferred_queue() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            queue: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// True if emitted events are kept for poll()
    pub fn is_deferred(&self) -> bool {
        self.queue.is_some()
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked immediately when emit() is called.
    /// Keep the returned id to remove this callback later.
    ///
    /// # Example
    /// ```ignore
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// let sink = Arc::clone(&seen);
    /// let id = bus.subscribe::<H264Emitted, _>(move |e| {
    ///     sink.lock().unwrap().push(e.0.dts_timestamp);
    /// });
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .insert(id, wrapped);
        id
    }

    /// Remove a single callback. Returns false if it was already gone.
    ///
    /// Remaining callbacks for the same type keep their relative order.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        subscribers.retain(|_, callbacks| {
            if !removed && callbacks.shift_remove(&id).is_some() {
                removed = true;
            }
            !callbacks.is_empty()
        });
        removed
    }

    /// Emit event: invoke callbacks immediately, then queue it if deferred.
    ///
    /// Callbacks are called synchronously; on a deferred bus the event is
    /// then added to the queue for retrieval via poll().
    pub fn emit<E: Event + Clone>(&self, event: E) {
        dispatch(&self.subscribers, &event);
        enqueue(&self.queue, Box::new(event));
    }

    /// Emit boxed event (for dynamic dispatch).
    pub fn emit_boxed(&self, event: BoxedEvent) {
        // IMPORTANT: Use (*event).as_any() to call through dyn Event vtable,
        // not Box<dyn Event>'s blanket impl (see downcast_event docs)
        dispatch_any(&self.subscribers, (*event).as_any());
        enqueue(&self.queue, event);
    }

    // ========== Deferred Processing ==========

    /// Poll all queued events for batch processing.
    ///
    /// Returns all events emitted since last poll (always empty on an
    /// immediate-only bus):
    /// ```ignore
    /// for event in event_bus.poll() {
    ///     if let Some(frame) = downcast_event::<H264Emitted>(&event) { ... }
    /// }
    /// ```
    pub fn poll(&self) -> Vec<BoxedEvent> {
        match &self.queue {
            Some(queue) => std::mem::take(&mut *queue.lock().unwrap_or_else(|e| e.into_inner())),
            None => Vec::new(),
        }
    }

    // ========== Handle & Utilities ==========

    /// Get an emitter handle for components that only publish.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            subscribers: Arc::clone(&self.subscribers),
            queue: self.queue.clone(),
        }
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).remove(&TypeId::of::<E>());
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(queue) = &self.queue {
            queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    /// Number of callbacks subscribed to event type E
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Check queue length
    pub fn queue_len(&self) -> usize {
        queue_len(&self.queue)
    }
}

/// Lightweight emitter handle.
///
/// Can be cloned and moved into callbacks or timer tasks for emitting events.
#[derive(Clone)]
pub struct EventEmitter {
    subscribers: Subscribers,
    queue: Queue,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &queue_len(&self.queue))
            .finish()
    }
}

impl EventEmitter {
    /// Emit event: invoke callbacks, then queue it if the bus is deferred
    pub fn emit<E: Event + Clone>(&self, event: E) {
        dispatch(&self.subscribers, &event);
        enqueue(&self.queue, Box::new(event));
    }

    /// Emit boxed event
    pub fn emit_boxed(&self, event: BoxedEvent) {
        dispatch_any(&self.subscribers, (*event).as_any());
        enqueue(&self.queue, event);
    }

    /// True if both handles publish to the same bus.
    pub fn same_bus(&self, bus: &EventBus) -> bool {
        Arc::ptr_eq(&self.subscribers, &bus.subscribers)
    }
}

fn dispatch<E: Event>(subscribers: &Subscribers, event: &E) {
    dispatch_any(subscribers, event as &dyn Any);
}

fn dispatch_any(subscribers: &Subscribers, event: &dyn Any) {
    // Snapshot, then release the lock before invoking callbacks
    let callbacks: Vec<Callback> = match subscribers
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&event.type_id())
    {
        Some(cbs) => cbs.values().cloned().collect(),
        None => return,
    };
    for cb in callbacks {
        cb(event);
    }
}

fn queue_len(queue: &Queue) -> usize {
    queue
        .as_ref()
        .map(|q| q.lock().map(|q| q.len()).unwrap_or_else(|e| e.into_inner().len()))
        .unwrap_or(0)
}

fn enqueue(queue: &Queue, event: BoxedEvent) {
    let Some(queue) = queue else { return };
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    if queue.len() >= MAX_QUEUE_SIZE {
        let evict_count = queue.len() / 2;
        warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
        queue.drain(0..evict_count);
    }
    queue.push(event);
}

/// Helper: downcast BoxedEvent to concrete type
///
/// IMPORTANT: Must explicitly deref to `dyn Event` before calling `as_any()`.
/// Without explicit deref, the blanket impl `Event for Box<dyn Event>` intercepts
/// the call and returns `&dyn Any` containing `Box<dyn Event>` instead of the
/// original type, causing downcast to always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
