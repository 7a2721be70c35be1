//! Fire-once delayed callbacks.
//!
//! Scheduling returns nothing: once a task is handed to a [`Timer`] it will run,
//! it cannot be cancelled or queried. Two implementations:
//! - [`TimerThread`]: one background thread, deadlines kept in a min-heap
//! - [`ManualTimer`]: virtual clock advanced explicitly (tests, offline pipelines)

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, LazyLock, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{trace, warn};

/// Deferred work item
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Delayed-callback facility used by buffering strategies.
pub trait Timer: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Blanket impl: Arc<T> implements Timer if T does
impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn schedule(&self, delay: Duration, task: Task) {
        (**self).schedule(delay, task)
    }
}

static SHARED: LazyLock<Arc<TimerThread>> = LazyLock::new(|| Arc::new(TimerThread::new()));

/// Process-wide timer thread, spawned on first use.
pub fn shared() -> Arc<TimerThread> {
    Arc::clone(&SHARED)
}

/// Heap entry ordered by (deadline, seq) so equal deadlines fire in scheduling order.
struct Pending<T> {
    deadline: T,
    seq: u64,
    task: Task,
}

impl<T: Ord> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for Pending<T> {}

impl<T: Ord> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Pending<T> {
    // Reversed: BinaryHeap is a max-heap, earliest deadline must pop first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Background timer thread.
///
/// Tasks run on the timer thread. When the handle is dropped the thread
/// keeps firing what is already scheduled, then exits. A delay whose
/// deadline cannot be represented by [`Instant`] never elapses, so such a
/// task is dropped without running.
pub struct TimerThread {
    tx: Sender<(Instant, Task)>,
}

impl Default for TimerThread {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerThread")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl TimerThread {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let spawned = thread::Builder::new()
            .name("avsync-timer".into())
            .spawn(move || run_timer(rx));
        if let Err(e) = spawned {
            // Sender stays disconnected, schedule() will fall back to inline sleeps
            warn!("Failed to spawn timer thread: {}", e);
        }
        Self { tx }
    }
}

impl Timer for TimerThread {
    fn schedule(&self, delay: Duration, task: Task) {
        trace!("TimerThread: scheduling task in {}ms", delay.as_millis());
        let Some(deadline) = Instant::now().checked_add(delay) else {
            warn!("TimerThread: delay of {}s is out of clock range, task dropped", delay.as_secs());
            return;
        };
        if let Err(err) = self.tx.send((deadline, task)) {
            // No timer thread: keep the no-earlier-than guarantee on a one-off thread
            let (deadline, task) = err.into_inner();
            let spawned = thread::Builder::new()
                .name("avsync-timer-fallback".into())
                .spawn(move || {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    task();
                });
            if let Err(e) = spawned {
                warn!("Dropping timer task, no thread available: {}", e);
            }
        }
    }
}

fn run_timer(rx: Receiver<(Instant, Task)>) {
    trace!("Timer thread started");
    let mut heap: BinaryHeap<Pending<Instant>> = BinaryHeap::new();
    let mut seq = 0u64;
    let mut connected = true;

    loop {
        // Fire everything that is due
        let now = Instant::now();
        while heap.peek().is_some_and(|p| p.deadline <= now) {
            if let Some(pending) = heap.pop() {
                (pending.task)();
            }
        }

        let next = heap.peek().map(|p| p.deadline);
        let received = match (next, connected) {
            (None, false) => break,
            (Some(deadline), false) => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                continue;
            }
            (None, true) => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            (Some(deadline), true) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        };

        match received {
            Ok((deadline, task)) => {
                heap.push(Pending { deadline, seq, task });
                seq += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Timer handle dropped, draining {} pending task(s)", heap.len());
                connected = false;
            }
        }
    }
    trace!("Timer thread stopped");
}

/// Virtual-clock timer. Nothing fires until [`ManualTimer::advance`] moves
/// the clock past a task's deadline.
///
/// The clock and deadlines saturate at [`Duration::MAX`].
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    heap: BinaryHeap<Pending<Duration>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock
    pub fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    /// Number of tasks not yet fired
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).heap.len()
    }

    /// Move the clock forward and run due tasks in deadline order.
    ///
    /// Tasks run without the internal lock held, so they may schedule more work;
    /// work scheduled inside the advanced window also fires. Returns the number
    /// of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut fired = 0;
        loop {
            let task = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let due = state.heap.peek().is_some_and(|p| p.deadline <= target);
                let popped = if due { state.heap.pop() } else { None };
                let Some(pending) = popped else {
                    state.now = target;
                    break;
                };
                state.now = state.now.max(pending.deadline);
                pending.task
            };
            task();
            fired += 1;
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = state.now.saturating_add(delay);
        let seq = state.seq;
        state.seq += 1;
        state.heap.push(Pending { deadline, seq, task });
    }
}
