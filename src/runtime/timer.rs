//! Timer service: deadline-ordered callbacks.
//!
//! The runtime never sleeps a worker to wait for a deadline; it hands the
//! delay to a [`TimerService`] and gets called back. The production
//! implementation is [`ClockTimer`], a dedicated thread over a min-heap of
//! deadlines. The lab runtime substitutes a virtual clock with the same
//! trait, which is what makes timeout semantics testable without real
//! sleeps.

use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::{Duration, Instant};

/// A timer expiry notification.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Schedules callbacks to run after a delay.
///
/// Implementations must tolerate a callback arming further timers on the
/// same service, so expiries are never invoked while internal locks are
/// held.
pub trait TimerService: Send + Sync {
    /// Runs `callback` once `delay` has elapsed.
    ///
    /// Best effort after shutdown: a service that is stopping may drop the
    /// callback instead of running it.
    fn after(&self, delay: Duration, callback: TimerCallback);
}

/// One armed timer on the wall clock.
struct ClockEntry {
    deadline: Instant,
    /// Insertion order; breaks deadline ties so expiry order is stable.
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for ClockEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ClockEntry {}

impl Ord for ClockEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ClockEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ClockQueue {
    heap: BinaryHeap<ClockEntry>,
    next_seq: u64,
    shutdown: bool,
}

struct ClockShared {
    queue: Mutex<ClockQueue>,
    tick: Condvar,
}

/// Wall-clock [`TimerService`] backed by one dedicated thread.
///
/// Expired callbacks run on the timer thread, outside the heap lock, in
/// deadline order. Arming is O(log n); a newly armed earlier deadline wakes
/// the thread to re-sleep.
pub struct ClockTimer {
    shared: Arc<ClockShared>,
    worker: Mutex<Option<ThreadJoinHandle<()>>>,
}

impl ClockTimer {
    /// Starts the timer thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(ClockShared {
            queue: Mutex::new(ClockQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            tick: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("weft-timer".to_string())
            .spawn(move || timer_loop(&worker_shared))
            .expect("failed to spawn timer thread");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the timer thread, dropping any not-yet-expired callbacks.
    ///
    /// Idempotent; also called on drop.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            let dropped = queue.heap.len();
            queue.heap.clear();
            if dropped > 0 {
                trace!(dropped, "timer shutdown dropped pending deadlines");
            }
        }
        self.shared.tick.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl TimerService for ClockTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) {
        let deadline = Instant::now() + delay;
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(ClockEntry {
                deadline,
                seq,
                callback,
            });
        }
        self.shared.tick.notify_one();
    }
}

impl Default for ClockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClockTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ClockTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("ClockTimer")
            .field("armed", &queue.heap.len())
            .field("shutdown", &queue.shutdown)
            .finish()
    }
}

fn timer_loop(shared: &ClockShared) {
    let mut due: Vec<TimerCallback> = Vec::new();
    loop {
        {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                let now = Instant::now();
                while queue.heap.peek().is_some_and(|e| e.deadline <= now) {
                    if let Some(entry) = queue.heap.pop() {
                        due.push(entry.callback);
                    }
                }
                if !due.is_empty() {
                    break;
                }
                match queue.heap.peek().map(|e| e.deadline) {
                    Some(deadline) => {
                        let _ = shared.tick.wait_until(&mut queue, deadline);
                    }
                    None => shared.tick.wait(&mut queue),
                }
            }
        }
        // Callbacks run unlocked so they may arm new timers on this
        // service without deadlocking.
        for callback in due.drain(..) {
            callback();
        }
    }
}
