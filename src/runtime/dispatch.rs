//! Task dispatch: handing ready tasks to execution contexts.
//!
//! State transitions produce ready tasks; a [`Dispatcher`] decides where
//! they run. [`ThreadDispatcher`] feeds a pool of worker threads through a
//! shared injector queue. [`InlineDispatcher`] just collects tasks for a
//! driver loop to drain, which is how the lab runtime keeps execution
//! single-threaded and deterministic.

use crate::types::TaskId;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Queues ready tasks for execution.
pub trait Dispatcher: Send + Sync + 'static {
    /// Submits a task. Must not block and must be safe to call while
    /// runtime locks are NOT held; callers submit after releasing state.
    fn submit(&self, task: TaskId);
}

/// Multi-worker dispatcher: an injector queue plus thread parking.
///
/// Workers loop on [`next`](Self::next); `submit` unparks one. After
/// [`shutdown`](Self::shutdown), `next` drains what is queued and then
/// returns `None`, so workers finish in-flight wakeups before exiting.
pub struct ThreadDispatcher {
    queue: SegQueue<TaskId>,
    /// Guards the park/unpark handshake; holds no data.
    gate: Mutex<()>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl ThreadDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            gate: Mutex::new(()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Blocks until a task is available. Returns `None` once the dispatcher
    /// is shut down and the queue has drained.
    pub fn next(&self) -> Option<TaskId> {
        loop {
            if let Some(task) = self.queue.pop() {
                return Some(task);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            let mut gate = self.gate.lock();
            // Re-check under the gate: a submit that raced the first check
            // took this lock before notifying, so it is visible here.
            if let Some(task) = self.queue.pop() {
                return Some(task);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            self.available.wait(&mut gate);
        }
    }

    /// Wakes all workers; each exits once the queue is drained.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        drop(self.gate.lock());
        self.available.notify_all();
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Dispatcher for ThreadDispatcher {
    fn submit(&self, task: TaskId) {
        self.queue.push(task);
        // Serialize against a worker's under-gate re-check so the wakeup
        // cannot be lost between its pop and its park.
        drop(self.gate.lock());
        self.available.notify_one();
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadDispatcher")
            .field("queued", &self.queue.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Single-threaded FIFO dispatcher for driver loops.
///
/// `submit` only queues; nothing runs until the driver pops. The lab
/// runtime drains and reorders this queue to explore schedules, so the
/// queue is exposed as data rather than behavior.
#[derive(Debug, Default)]
pub struct InlineDispatcher {
    queue: Mutex<VecDeque<TaskId>>,
}

impl InlineDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the next queued task.
    pub fn pop(&self) -> Option<TaskId> {
        self.queue.lock().pop_front()
    }

    /// Takes the whole queue, for reordering.
    pub fn drain(&self) -> Vec<TaskId> {
        self.queue.lock().drain(..).collect()
    }

    /// Puts tasks back, in order, behind anything queued meanwhile.
    pub fn requeue(&self, tasks: impl IntoIterator<Item = TaskId>) {
        let mut queue = self.queue.lock();
        queue.extend(tasks);
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Dispatcher for InlineDispatcher {
    fn submit(&self, task: TaskId) {
        self.queue.lock().push_back(task);
    }
}
