//! Runtime builder and the threaded runtime it produces.

use crate::cx::ScopeHandle;
use crate::runtime::config::{apply_env_overrides, BuildError, RuntimeConfig};
use crate::runtime::dispatch::{Dispatcher, ThreadDispatcher};
use crate::runtime::exec;
use crate::runtime::state::{RuntimeState, Wakeups};
use crate::runtime::timer::{ClockTimer, TimerService};
use crate::runtime::RuntimeShared;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, ScopePolicy};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

/// Builder for constructing a [`Runtime`] with custom configuration.
///
/// Each method consumes `self` and returns an updated builder, so options
/// chain without borrowing hazards:
///
/// ```ignore
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .thread_name_prefix("app-worker")
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Create a builder from defaults with `WEFT_*` environment overrides
    /// applied. Builder methods called afterwards still win.
    ///
    /// # Errors
    ///
    /// Returns an error if an override variable is set but unparseable.
    pub fn from_env() -> Result<Self, BuildError> {
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Single worker thread: tasks run one at a time, in submission order.
    #[must_use]
    pub fn single_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Multi-threaded runtime with defaults.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }

    /// Build a runtime from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker or timer thread cannot be spawned.
    pub fn build(self) -> Result<Runtime, BuildError> {
        Runtime::with_config(self.config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A threaded runtime driving suspendable tasks.
///
/// Worker threads pull ready tasks from a shared queue and run one segment
/// at a time; timers fire on a dedicated clock thread. Work is spawned
/// through root scopes opened with [`Runtime::scope`].
///
/// # Shutdown
///
/// [`Runtime::shutdown`] (also run on drop) cancels every remaining task,
/// waits for their cancellation segments to finish, then joins the workers.
/// No task is abandoned mid-segment.
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    dispatcher: Arc<ThreadDispatcher>,
    timer: Arc<ClockTimer>,
    workers: Vec<thread::JoinHandle<()>>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Construct a runtime with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new() -> Result<Self, BuildError> {
        RuntimeBuilder::new().build()
    }

    /// Returns a builder for a customized runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Construct a runtime from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, BuildError> {
        config.normalize();

        let dispatcher = Arc::new(ThreadDispatcher::new());
        let timer = Arc::new(ClockTimer::new());
        let submit: Arc<dyn Dispatcher> = dispatcher.clone();
        let clock: Arc<dyn TimerService> = timer.clone();
        let shared = Arc::new(RuntimeShared {
            state: Mutex::new(RuntimeState::new()),
            joiners: Condvar::new(),
            dispatcher: submit,
            timer: clock,
        });

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let name = format!("{}-{index}", config.thread_name_prefix);
            let worker_shared = Arc::clone(&shared);
            let worker_queue = Arc::clone(&dispatcher);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .stack_size(config.thread_stack_size)
                .spawn(move || worker_loop(&worker_shared, &worker_queue));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Unwind the partially built pool before reporting.
                    dispatcher.shutdown();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    timer.stop();
                    return Err(BuildError::ThreadSpawn {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }
        debug!(workers = config.worker_threads, "runtime started");

        Ok(Self {
            shared,
            dispatcher,
            timer,
            workers,
            config,
        })
    }

    /// Returns the normalized runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Opens a root scope for spawning tasks.
    ///
    /// The scope owns every task spawned through its handle. Use
    /// [`ScopeHandle::join`] to wait for all of them and surface the first
    /// failure, or [`ScopeHandle::cancel_all`] to tear them down.
    #[must_use]
    pub fn scope(&self, policy: ScopePolicy) -> ScopeHandle {
        let scope = self.shared.state.lock().create_root_scope(policy);
        ScopeHandle::new(Arc::clone(&self.shared), scope)
    }

    /// Cancels all remaining work and joins the worker threads.
    ///
    /// Every live task receives a shutdown cancellation and runs its
    /// remaining cancellation segments before the workers exit. Also runs
    /// on drop.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let wakeups = {
            let mut state = self.shared.state.lock();
            let mut wakeups = Wakeups::default();
            state.cancel_all_roots(CancelReason::shutdown(), &mut wakeups);
            wakeups
        };
        exec::perform(&self.shared, wakeups);

        // Let cancellation segments drain before parking the queue.
        {
            let mut state = self.shared.state.lock();
            while state.live_task_count() > 0 {
                self.shared.joiners.wait(&mut state);
            }
        }

        self.dispatcher.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.timer.stop();
        debug!("runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Arc<RuntimeShared>, queue: &Arc<ThreadDispatcher>) {
    while let Some(task) = queue.next() {
        exec::run_ready(shared, task);
    }
    trace!("worker exiting");
}
