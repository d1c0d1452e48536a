//! Deterministic lab runtime.
//!
//! Same state tables, same transitions, different drivers: instead of
//! worker threads and a wall clock, the lab holds an [`InlineDispatcher`]
//! it drains one task at a time and a virtual clock it advances by hand.
//! Given the same seed and the same program, every run executes the same
//! schedule, which turns interleaving bugs into reproducible test failures.
//!
//! ```ignore
//! let mut lab = LabRuntime::with_seed(7);
//! let scope = lab.scope(ScopePolicy::FailFast);
//! let handle = scope.spawn(Sleep::new(Duration::from_millis(100)))?;
//! lab.run_until_quiescent();        // task suspends on its timer
//! lab.advance_time(Duration::from_millis(100));
//! lab.run_until_quiescent();        // task completes
//! assert!(handle.is_finished());
//! ```

use crate::cx::ScopeHandle;
use crate::lab::clock::VirtualClock;
use crate::lab::config::LabConfig;
use crate::record::TaskState;
use crate::runtime::dispatch::{Dispatcher, InlineDispatcher};
use crate::runtime::exec;
use crate::runtime::state::RuntimeState;
use crate::runtime::timer::TimerService;
use crate::runtime::RuntimeShared;
use crate::tracing_compat::{debug, trace};
use crate::types::{ScopePolicy, TaskId, Time};
use crate::util::DetRng;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Single-threaded runtime under test control.
///
/// All execution happens inside [`step`](Self::step) and the methods built
/// on it; between calls nothing runs and nothing moves. Timers fire only
/// through [`advance_time`](Self::advance_time).
///
/// # Determinism
///
/// With `shuffle_ready` off, tasks run in submission order. With it on,
/// the ready queue is permuted by the seeded generator before every step;
/// the same seed always yields the same permutations, so a failing
/// schedule replays exactly.
///
/// # Blocking handles
///
/// `JoinHandle::await_result` and `ScopeHandle::join` park the calling
/// thread, and in the lab that thread is the only driver. Call them after
/// the relevant work has been drained, when the result is already in
/// place, never to make progress happen.
pub struct LabRuntime {
    shared: Arc<RuntimeShared>,
    queue: Arc<InlineDispatcher>,
    clock: Arc<VirtualClock>,
    config: LabConfig,
    rng: DetRng,
    steps: u64,
}

impl LabRuntime {
    /// Creates a lab runtime from a configuration.
    #[must_use]
    pub fn new(config: LabConfig) -> Self {
        let queue = Arc::new(InlineDispatcher::new());
        let clock = Arc::new(VirtualClock::new());
        let dispatcher: Arc<dyn Dispatcher> = Arc::clone(&queue) as Arc<dyn Dispatcher>;
        let timer: Arc<dyn TimerService> = Arc::clone(&clock) as Arc<dyn TimerService>;
        let shared = Arc::new(RuntimeShared {
            state: Mutex::new(RuntimeState::new()),
            joiners: Condvar::new(),
            dispatcher,
            timer,
        });
        let rng = config.rng();
        debug!(seed = config.seed, shuffle = config.shuffle_ready, "lab runtime created");
        Self {
            shared,
            queue,
            clock,
            config,
            rng,
            steps: 0,
        }
    }

    /// Creates a lab runtime with default settings and the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(LabConfig::new(seed))
    }

    /// Opens a root scope on this runtime.
    #[must_use]
    pub fn scope(&self, policy: ScopePolicy) -> ScopeHandle {
        let scope = self.shared.state.lock().create_root_scope(policy);
        ScopeHandle::new(Arc::clone(&self.shared), scope)
    }

    /// The current virtual instant.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Total steps executed since creation.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// The configuration this lab was built with.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }

    /// True when no task is ready to run.
    ///
    /// Quiescent does not mean finished: suspended tasks may still be
    /// waiting on timers ([`pending_timers`](Self::pending_timers)) or on
    /// events fired from outside.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs one ready task for one segment. Returns false if nothing was
    /// ready.
    pub fn step(&mut self) -> bool {
        if self.config.shuffle_ready {
            let mut ready = self.queue.drain();
            self.rng.shuffle(&mut ready);
            self.queue.requeue(ready);
        }
        let Some(task) = self.queue.pop() else {
            return false;
        };
        self.steps += 1;
        trace!(task = %task, step = self.steps, "lab step");
        exec::run_ready(&self.shared, task);
        true
    }

    /// Runs ready tasks until the queue is empty. Returns the number of
    /// steps executed by this call.
    ///
    /// # Panics
    ///
    /// Panics if the configured `max_steps` budget is exhausted while work
    /// remains ready; in the lab that means a livelock (for instance a
    /// yield loop with no exit condition).
    pub fn run_until_quiescent(&mut self) -> u64 {
        let mut executed = 0_u64;
        while self.step() {
            executed += 1;
            if let Some(limit) = self.config.max_steps {
                assert!(
                    executed < limit,
                    "lab runtime did not quiesce within {limit} steps"
                );
            }
        }
        executed
    }

    /// Advances virtual time by `delta`, firing every timer due by then in
    /// deadline order. Returns how many fired.
    ///
    /// Fired timers stage their wakeups through the ordinary paths, so the
    /// resumed tasks sit in the ready queue afterward; drain them with
    /// [`run_until_quiescent`](Self::run_until_quiescent).
    pub fn advance_time(&mut self, delta: Duration) -> usize {
        let target = self.clock.now() + delta;
        trace!(target = %target, "advancing virtual time");
        let mut fired = 0;
        loop {
            // A fired callback may arm another timer already due by the
            // target, so keep collecting until a pass comes back empty.
            let due = self.clock.advance_to(target);
            if due.is_empty() {
                break;
            }
            fired += due.len();
            for callback in due {
                callback();
            }
        }
        fired
    }

    /// Earliest armed timer deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.clock.next_deadline()
    }

    /// Number of armed, not yet fired timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.clock.pending()
    }

    /// Number of tasks not yet terminal.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.shared.state.lock().live_task_count()
    }

    /// Lifecycle state of a task, while its record is live.
    #[must_use]
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.shared.state.lock().task_state(task)
    }
}

impl Default for LabRuntime {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

impl fmt::Debug for LabRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabRuntime")
            .field("now", &self.now())
            .field("steps", &self.steps)
            .field("ready", &self.queue.len())
            .field("timers", &self.pending_timers())
            .finish_non_exhaustive()
    }
}
