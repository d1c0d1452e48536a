//! Virtual time for the lab runtime.
//!
//! The clock never advances on its own. Armed callbacks sit in a
//! deadline-ordered heap until the lab driver calls
//! [`VirtualClock::advance_to`], which pops everything due and hands it
//! back to run outside the lock. Deadline ties break by arming order, so a
//! given schedule always fires the same sequence.

use crate::runtime::timer::{TimerCallback, TimerService};
use crate::types::Time;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

struct Entry {
    deadline: Time,
    /// Insertion order; breaks deadline ties so expiry order is stable.
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ClockInner {
    now: Time,
    next_seq: u64,
    queue: BinaryHeap<Entry>,
}

/// Deadline heap over [`Time`] instead of the wall clock.
pub(crate) struct VirtualClock {
    inner: Mutex<ClockInner>,
}

impl VirtualClock {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                now: Time::ZERO,
                next_seq: 0,
                queue: BinaryHeap::new(),
            }),
        }
    }

    /// The current virtual instant.
    pub(crate) fn now(&self) -> Time {
        self.inner.lock().now
    }

    /// Number of armed, not yet fired timers.
    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Earliest armed deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<Time> {
        self.inner.lock().queue.peek().map(|e| e.deadline)
    }

    /// Moves the clock forward to `target` (never backward) and takes every
    /// callback due by then, in deadline order.
    ///
    /// The callbacks are returned rather than run so the caller can invoke
    /// them without holding the clock lock; a callback arming a new timer
    /// on this clock must not deadlock.
    pub(crate) fn advance_to(&self, target: Time) -> Vec<TimerCallback> {
        let mut inner = self.inner.lock();
        if target > inner.now {
            inner.now = target;
        }
        let now = inner.now;
        let mut due = Vec::new();
        while inner.queue.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = inner.queue.pop() {
                due.push(entry.callback);
            }
        }
        due
    }
}

impl TimerService for VirtualClock {
    fn after(&self, delay: Duration, callback: TimerCallback) {
        let mut inner = self.inner.lock();
        let deadline = inner.now + delay;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(Entry {
            deadline,
            seq,
            callback,
        });
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("VirtualClock")
            .field("now", &inner.now)
            .field("armed", &inner.queue.len())
            .finish()
    }
}
