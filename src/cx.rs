//! Execution context and scope handles: how running code talks back to the
//! runtime.
//!
//! A [`Cx`] is handed to every segment run. It names the task being run and
//! the scope it belongs to, and carries the capabilities a segment may use
//! mid-flight: spawn a sibling, open a nested scope, arm an external event,
//! poll for cancellation. It is cheap to clone and deliberately small; a
//! coroutine that needs nothing from the runtime can ignore it.
//!
//! A [`ScopeHandle`] is the owner-side view of one scope: spawn members into
//! it, cancel them all, and join the whole set. Root handles come from
//! [`Runtime::scope`]; nested handles from [`Cx::open_scope`].
//!
//! # Thread Safety
//!
//! Both types are `Send + Sync` and lock the runtime state only for the
//! duration of a single transition. Neither runs user code while holding
//! the lock.
//!
//! [`Runtime::scope`]: crate::runtime::Runtime::scope

use crate::error::Result;
use crate::runtime::dispatch::{Dispatcher, InlineDispatcher};
use crate::runtime::exec;
use crate::runtime::handle::{Completion, JoinHandle};
use crate::runtime::state::{RuntimeState, SpawnRequest, Wakeups};
use crate::runtime::timer::{TimerCallback, TimerService};
use crate::runtime::RuntimeShared;
use crate::step::{erase, Coroutine, EventToken};
use crate::tracing_compat::trace;
use crate::types::{CancelKind, CancelReason, ScopeId, ScopePolicy, TaskId, TaskReport};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// When a spawned task first becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Submitted to the dispatcher immediately.
    #[default]
    Eager,
    /// Stays `New` until [`JoinHandle::start`] or the first join of it.
    Lazy,
}

/// Options applied to one spawn.
///
/// ```ignore
/// let options = SpawnOptions::lazy()
///     .on_complete(|report| println!("done: {report}"))
///     .on_cancel(|reason| release_lease(reason));
/// let handle = scope.spawn_with(options, machine)?;
/// ```
#[derive(Default)]
pub struct SpawnOptions {
    start: StartMode,
    on_complete: Option<Box<dyn FnOnce(TaskReport) + Send>>,
    on_cancel: Option<Box<dyn FnOnce(CancelReason) + Send>>,
}

impl SpawnOptions {
    /// Default options: eager start, no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a task that waits for an explicit start signal.
    #[must_use]
    pub fn lazy() -> Self {
        Self::new().start_mode(StartMode::Lazy)
    }

    /// Sets when the task first becomes runnable.
    #[must_use]
    pub fn start_mode(mut self, mode: StartMode) -> Self {
        self.start = mode;
        self
    }

    /// Hook invoked exactly once with the terminal [`TaskReport`], on every
    /// exit path. Runs outside the state lock.
    #[must_use]
    pub fn on_complete(mut self, hook: impl FnOnce(TaskReport) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Hook invoked once when cancellation is first requested for the task.
    /// Runs outside the state lock.
    #[must_use]
    pub fn on_cancel(mut self, hook: impl FnOnce(CancelReason) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("start", &self.start)
            .field("on_complete", &self.on_complete.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// The context a segment runs under.
///
/// Everything a coroutine may ask of the runtime goes through here. The
/// context is scoped to one task: spawns become children of this task in
/// its scope, events arm this task's completion slot, and
/// [`is_cancelled`](Self::is_cancelled) reads this task's flag.
#[derive(Clone)]
pub struct Cx {
    shared: Arc<RuntimeShared>,
    task: TaskId,
    scope: ScopeId,
    cancel_flag: Arc<AtomicBool>,
}

impl Cx {
    pub(crate) fn new(
        shared: Arc<RuntimeShared>,
        task: TaskId,
        scope: ScopeId,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            task,
            scope,
            cancel_flag,
        }
    }

    /// Context for driving a coroutine by hand in tests, backed by a
    /// detached state table with one root scope and one task.
    ///
    /// Spawns and events work; nothing executes until something drains the
    /// inline queue, and timers armed through it never fire.
    #[must_use]
    pub fn for_testing() -> Self {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(InlineDispatcher::new());
        let timer: Arc<dyn TimerService> = Arc::new(IdleTimer);
        let shared = Arc::new(RuntimeShared {
            state: Mutex::new(RuntimeState::new()),
            joiners: Condvar::new(),
            dispatcher,
            timer,
        });

        let (task, scope, cancel_flag) = {
            let mut state = shared.state.lock();
            let scope = state.create_root_scope(ScopePolicy::FailFast);
            let spawned = state.spawn(SpawnRequest {
                scope,
                parent: None,
                continuation: erase(crate::step::YieldNow::new()),
                lazy: true,
                on_complete: None,
                on_cancel: None,
            });
            match spawned {
                Ok(spawned) => {
                    let flag = state
                        .task(spawned.task)
                        .map_or_else(|| Arc::new(AtomicBool::new(false)), |r| {
                            Arc::clone(&r.cancel_flag)
                        });
                    (spawned.task, scope, flag)
                }
                Err(_) => (
                    TaskId::testing_default(),
                    scope,
                    Arc::new(AtomicBool::new(false)),
                ),
            }
        };
        Self::new(shared, task, scope, cancel_flag)
    }

    /// The task this context belongs to.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The scope the task is a member of.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Polls this task's cancellation flag.
    ///
    /// This is the escape hatch for long segments: a computation that does
    /// real work between suspend points checks this and winds down early.
    /// The flag is raised the moment cancellation is requested, before the
    /// [`ResumeInput::Cancelled`] notice is delivered.
    ///
    /// [`ResumeInput::Cancelled`]: crate::step::ResumeInput::Cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Spawns a sibling task into this task's scope.
    ///
    /// The new task is a child of this one: it must reach a terminal state
    /// before this task can complete, and it is cancelled when this task is
    /// cancelled or fails.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] if the scope has started tearing
    /// down.
    ///
    /// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
    pub fn spawn<C: Coroutine>(&self, coroutine: C) -> Result<JoinHandle<C::Output>> {
        self.spawn_with(SpawnOptions::new(), coroutine)
    }

    /// Spawns a child task with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] if the scope has started tearing
    /// down.
    ///
    /// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
    pub fn spawn_with<C: Coroutine>(
        &self,
        options: SpawnOptions,
        coroutine: C,
    ) -> Result<JoinHandle<C::Output>> {
        spawn_into(
            &self.shared,
            self.scope,
            Some(self.task),
            options,
            coroutine,
        )
    }

    /// Opens a scope nested under this task.
    ///
    /// The task cannot reach a terminal state until the nested scope
    /// closes; the scope closes once the task's body is done and every
    /// member is terminal. A failure collected by the nested scope becomes
    /// this task's failure unless the body already produced one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] if the enclosing scope has
    /// started tearing down.
    ///
    /// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
    pub fn open_scope(&self, policy: ScopePolicy) -> Result<ScopeHandle> {
        let scope = {
            let mut state = self.shared.state.lock();
            state.create_scope(self.scope, Some(self.task), policy)?
        };
        Ok(ScopeHandle::new(Arc::clone(&self.shared), scope))
    }

    /// Arms an external completion for this task.
    ///
    /// Returns the token to suspend on (via [`Step::wait_event`]) and the
    /// [`Completion`] handle that outside code fires to resume the task.
    /// Arming again supersedes the previous handle.
    ///
    /// [`Step::wait_event`]: crate::step::Step::wait_event
    #[must_use]
    pub fn event<T: Any + Send>(&self) -> (EventToken, Completion<T>) {
        let token = {
            let mut state = self.shared.state.lock();
            state.arm_event(self.task).unwrap_or(EventToken {
                task: self.task,
                seq: 0,
            })
        };
        trace!(task = %self.task, token = ?token, "event armed");
        let completion = Completion::new(Arc::downgrade(&self.shared), token);
        (token, completion)
    }

    /// Arms a timer that cancels `scope` with `reason` after `after`.
    ///
    /// This is the timeout primitive: race a scope's members against the
    /// clock. If the scope closes before the deadline, the late fire finds
    /// no record and does nothing.
    pub fn cancel_scope_after(&self, scope: ScopeId, after: Duration, reason: CancelReason) {
        let weak = Arc::downgrade(&self.shared);
        let callback: TimerCallback = Box::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let wakeups = {
                let mut state = shared.state.lock();
                let mut wakeups = Wakeups::default();
                state.cancel_scope(scope, reason, &mut wakeups);
                wakeups
            };
            exec::perform(&shared, wakeups);
        });
        self.shared.timer.after(after, callback);
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.task)
            .field("scope", &self.scope)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Timer backing [`Cx::for_testing`]: accepts registrations, never fires.
struct IdleTimer;

impl TimerService for IdleTimer {
    fn after(&self, _delay: Duration, _callback: TimerCallback) {}
}

/// Owner-side handle to one scope.
///
/// Spawn members, cancel them all, and join the set. The handle does not
/// keep the scope alive and dropping it detaches nothing: members stay
/// owned by the scope and keep running.
///
/// # Joining
///
/// [`join`](Self::join) blocks the calling thread, so it belongs outside
/// the runtime (main thread, tests). A coroutine that opened a nested scope
/// does not join it; the runtime holds the owning task in `Completing`
/// until the nested scope closes on its own.
#[derive(Clone)]
pub struct ScopeHandle {
    shared: Arc<RuntimeShared>,
    scope: ScopeId,
}

impl ScopeHandle {
    pub(crate) fn new(shared: Arc<RuntimeShared>, scope: ScopeId) -> Self {
        Self { shared, scope }
    }

    /// The scope's id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.scope
    }

    /// Spawns a task owned by this scope.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] once the scope is cancelling or
    /// closed. Admission and teardown are decided under one lock, so a
    /// spawn racing a cancellation either lands before it (and is
    /// cancelled with the rest) or fails here.
    ///
    /// [`ErrorKind::ScopeClosed`]: crate::error::ErrorKind::ScopeClosed
    pub fn spawn<C: Coroutine>(&self, coroutine: C) -> Result<JoinHandle<C::Output>> {
        self.spawn_with(SpawnOptions::new(), coroutine)
    }

    /// Spawns a task with explicit options.
    ///
    /// # Errors
    ///
    /// Same admission rules as [`spawn`](Self::spawn).
    pub fn spawn_with<C: Coroutine>(
        &self,
        options: SpawnOptions,
        coroutine: C,
    ) -> Result<JoinHandle<C::Output>> {
        spawn_into(&self.shared, self.scope, None, options, coroutine)
    }

    /// Cancels every member, recursively through nested scopes.
    ///
    /// The reason is forwarded to every task reached. Further spawns are
    /// rejected from this point on.
    pub fn cancel_all(&self, reason: CancelReason) {
        let wakeups = {
            let mut state = self.shared.state.lock();
            let mut wakeups = Wakeups::default();
            state.cancel_scope(self.scope, reason, &mut wakeups);
            wakeups
        };
        exec::perform(&self.shared, wakeups);
    }

    /// Cancels every member with an explicit-cancel reason.
    pub fn cancel(&self) {
        self.cancel_all(CancelReason::new(CancelKind::Explicit));
    }

    /// Blocks until every member is terminal, then surfaces the scope's
    /// first recorded failure.
    ///
    /// Lazy members that were never started are waited for like any other;
    /// start them or cancel the scope first. Joining an already-closed
    /// scope returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// The first member failure recorded by the scope, exactly once across
    /// all joiners.
    pub fn join(&self) -> Result<()> {
        let failure = {
            let mut state = self.shared.state.lock();
            let mut wakeups = Wakeups::default();
            state.seal_scope(self.scope, &mut wakeups);
            // Sealing an already-quiescent scope closes it on the spot, and
            // the wakeups carry only the joiner notification we are here
            // to consume.
            drop(wakeups);
            loop {
                if let Some(failure) = state.take_closed_root(self.scope) {
                    break failure;
                }
                self.shared.joiners.wait(&mut state);
            }
        };
        trace!(scope = %self.scope, failed = failure.is_some(), "scope joined");
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn spawn_into<C: Coroutine>(
    shared: &Arc<RuntimeShared>,
    scope: ScopeId,
    parent: Option<TaskId>,
    options: SpawnOptions,
    coroutine: C,
) -> Result<JoinHandle<C::Output>> {
    let SpawnOptions {
        start,
        on_complete,
        on_cancel,
    } = options;
    let spawned = {
        let mut state = shared.state.lock();
        state.spawn(SpawnRequest {
            scope,
            parent,
            continuation: erase(coroutine),
            lazy: matches!(start, StartMode::Lazy),
            on_complete,
            on_cancel,
        })?
    };
    if spawned.submit {
        shared.dispatcher.submit(spawned.task);
    }
    Ok(JoinHandle::new(
        Arc::clone(shared),
        spawned.task,
        spawned.cell,
    ))
}
