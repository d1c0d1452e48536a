//! Join and completion handles.
//!
//! [`JoinHandle`] is returned by spawn operations and lets the spawner
//! observe or await the task's result from outside the runtime. It does not
//! own the task: dropping the handle neither cancels nor detaches anything,
//! the task keeps running under its scope.
//!
//! [`Completion`] is the write end of an armed external event. Whoever holds
//! it (a callback, another thread) feeds the suspended task its resume input
//! exactly once.

use crate::error::{Error, Result};
use crate::runtime::exec;
use crate::runtime::state::Wakeups;
use crate::runtime::RuntimeShared;
use crate::step::{EventToken, ResumeInput};
use crate::tracing_compat::trace;
use crate::types::{CancelKind, CancelReason, Disposition, Outcome, TaskId, TaskReport};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Where a task's terminal outcome lands.
///
/// Shared between the task's record and every observer of its result. The
/// runtime fills the cell exactly once, when the task reaches a terminal
/// state; blocking joiners park on the condvar until then. The cell outlives
/// the task record, so a result can be collected after the owning scope
/// closed and reaped its members.
pub struct ResultCell {
    slot: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl ResultCell {
    /// Creates an unfilled cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Fills the cell and wakes every parked joiner.
    pub(crate) fn fill(&self, outcome: Outcome) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "result cell filled twice");
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    /// True once the outcome has landed.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Returns the terminal summary, if the task has finished.
    #[must_use]
    pub fn disposition(&self) -> Option<Disposition> {
        self.slot.lock().as_ref().map(Outcome::disposition)
    }

    /// Blocks until the outcome lands and returns its summary.
    pub fn wait(&self) -> Disposition {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.disposition();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Blocks until the outcome lands and takes the typed payload.
    ///
    /// The payload is single-take: the first typed consumer gets the value,
    /// later ones get [`Error::result_taken`].
    pub(crate) fn wait_take<T: Any + Send>(&self) -> Result<T> {
        let mut slot = self.slot.lock();
        loop {
            match slot.as_mut() {
                Some(Outcome::Completed(payload)) => {
                    return match payload.take() {
                        Some(value) => value
                            .downcast::<T>()
                            .map(|boxed| *boxed)
                            .map_err(|_| Error::computation("task result type mismatch")),
                        None => Err(Error::result_taken()),
                    };
                }
                Some(Outcome::Failed(err)) => return Err(err.clone()),
                Some(Outcome::Cancelled(reason)) => return Err(Error::cancelled(*reason)),
                None => {}
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Non-blocking typed take. `Ok(None)` while the task is still running.
    pub(crate) fn try_take<T: Any + Send>(&self) -> Result<Option<T>> {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            None => Ok(None),
            Some(Outcome::Completed(payload)) => match payload.take() {
                Some(value) => value
                    .downcast::<T>()
                    .map(|boxed| Some(*boxed))
                    .map_err(|_| Error::computation("task result type mismatch")),
                None => Err(Error::result_taken()),
            },
            Some(Outcome::Failed(err)) => Err(err.clone()),
            Some(Outcome::Cancelled(reason)) => Err(Error::cancelled(*reason)),
        }
    }

    /// Derives the resume input for a task that awaited this cell's task.
    ///
    /// A completed payload goes to the first waiter to derive it; later
    /// waiters of the same task resume with unit. Failure and cancellation
    /// both resume the waiter on its failure path, cancellation carrying the
    /// structured reason inside the error.
    pub(crate) fn derive_waiter_input(&self) -> ResumeInput {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(Outcome::Completed(payload)) => match payload.take() {
                Some(value) => ResumeInput::Value(value),
                None => ResumeInput::unit(),
            },
            Some(Outcome::Failed(err)) => ResumeInput::Failed(err.clone()),
            Some(Outcome::Cancelled(reason)) => ResumeInput::Failed(Error::cancelled(*reason)),
            None => {
                debug_assert!(false, "derived waiter input from an unfilled cell");
                ResumeInput::Failed(Error::unknown_task())
            }
        }
    }
}

impl Default for ResultCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResultCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCell")
            .field("filled", &self.is_filled())
            .finish()
    }
}

/// A handle to a spawned task.
///
/// Returned by spawn operations. Provides the task id, cancellation, and
/// blocking access to the result from outside the runtime.
///
/// # Ownership
///
/// The handle does not own the task; the task is owned by its scope.
/// Dropping the handle changes nothing, the task keeps running and its
/// outcome still counts toward the scope's result.
///
/// # Blocking
///
/// [`join`](Self::join) and [`await_result`](Self::await_result) park the
/// calling thread. They are for code outside the runtime; a task segment
/// that needs another task's result suspends on it instead, which keeps the
/// worker free.
pub struct JoinHandle<T> {
    shared: Arc<RuntimeShared>,
    task: TaskId,
    cell: Arc<ResultCell>,
    _output: PhantomData<fn() -> T>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(shared: Arc<RuntimeShared>, task: TaskId, cell: Arc<ResultCell>) -> Self {
        Self {
            shared,
            task,
            cell,
            _output: PhantomData,
        }
    }

    /// Returns the id of the spawned task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task
    }

    /// Starts a lazily spawned task. No-op if it already started.
    pub fn start(&self) {
        let submit = self.shared.state.lock().start_task(self.task);
        if submit {
            self.shared.dispatcher.submit(self.task);
        }
    }

    /// Requests cancellation with an explicit reason.
    ///
    /// This is a request: the task observes it at its next suspend point or
    /// cancellation poll. Cancelling a finished task is a no-op.
    pub fn cancel(&self) {
        self.cancel_with_reason(CancelReason::new(CancelKind::Explicit));
    }

    /// Requests cancellation carrying the given reason.
    pub fn cancel_with_reason(&self, reason: CancelReason) {
        trace!(task = %self.task, reason = %reason, "cancel requested via handle");
        let wakeups = {
            let mut state = self.shared.state.lock();
            let mut wakeups = Wakeups::default();
            state.request_cancel_task(self.task, reason, &mut wakeups);
            wakeups
        };
        exec::perform(&self.shared, wakeups);
    }

    /// True once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cell.is_filled()
    }

    /// Returns the terminal report, if the task has finished.
    #[must_use]
    pub fn report(&self) -> Option<TaskReport> {
        self.cell
            .disposition()
            .map(|disposition| TaskReport::new(self.task, disposition))
    }

    /// Blocks until the task is terminal and returns how it ended.
    ///
    /// Implicitly starts a lazy task, so joining can never park forever on a
    /// task that was never submitted.
    ///
    /// # Errors
    ///
    /// Returns the task's failure, or [`ErrorKind::Cancelled`] if the task
    /// was cancelled.
    ///
    /// [`ErrorKind::Cancelled`]: crate::error::ErrorKind::Cancelled
    pub fn join(&self) -> Result<()> {
        self.start();
        self.cell.wait().into_result()
    }
}

impl<T: Any + Send> JoinHandle<T> {
    /// Blocks until the task is terminal and takes its typed result.
    ///
    /// Implicitly starts a lazy task. The payload is single-take: a second
    /// call returns [`ErrorKind::ResultTaken`].
    ///
    /// # Errors
    ///
    /// Returns the task's failure, [`ErrorKind::Cancelled`] for a cancelled
    /// task, or [`ErrorKind::Computation`] if `T` does not match the value
    /// the task produced.
    ///
    /// [`ErrorKind::Cancelled`]: crate::error::ErrorKind::Cancelled
    /// [`ErrorKind::ResultTaken`]: crate::error::ErrorKind::ResultTaken
    /// [`ErrorKind::Computation`]: crate::error::ErrorKind::Computation
    pub fn await_result(&self) -> Result<T> {
        self.start();
        self.cell.wait_take()
    }

    /// Takes the typed result without blocking.
    ///
    /// # Errors
    ///
    /// Same failure cases as [`await_result`](Self::await_result); `Ok(None)`
    /// while the task is still running.
    pub fn try_result(&self) -> Result<Option<T>> {
        self.cell.try_take()
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("task", &self.task)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// The write end of an armed external event.
///
/// Handed out by [`Cx::event`]; consumed by firing. The suspended task
/// resumes with whatever the handle delivers: a value through
/// [`complete`](Self::complete) or an error through [`fail`](Self::fail).
///
/// Exactly one fire per armed event succeeds. Firing after the event was
/// superseded or already completed returns
/// [`ErrorKind::IllegalResume`]; firing after the whole runtime shut down
/// returns [`ErrorKind::Shutdown`].
///
/// The handle holds only a weak reference to the runtime, so a callback
/// captured by some external system never keeps a dead runtime alive.
///
/// [`Cx::event`]: crate::Cx::event
/// [`ErrorKind::IllegalResume`]: crate::error::ErrorKind::IllegalResume
/// [`ErrorKind::Shutdown`]: crate::error::ErrorKind::Shutdown
pub struct Completion<T> {
    shared: Weak<RuntimeShared>,
    token: EventToken,
    _input: PhantomData<fn(T)>,
}

impl<T: Any + Send> Completion<T> {
    pub(crate) fn new(shared: Weak<RuntimeShared>, token: EventToken) -> Self {
        Self {
            shared,
            token,
            _input: PhantomData,
        }
    }

    /// Returns the task this handle resumes.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.token.task
    }

    /// Delivers a success value to the suspended task.
    ///
    /// # Errors
    ///
    /// See the type-level docs for the failure cases.
    pub fn complete(self, value: T) -> Result<()> {
        self.fire(ResumeInput::value(value))
    }

    /// Delivers a failure to the suspended task, routing it into the
    /// computation's failure path.
    ///
    /// # Errors
    ///
    /// See the type-level docs for the failure cases.
    pub fn fail(self, err: Error) -> Result<()> {
        self.fire(ResumeInput::Failed(err))
    }

    fn fire(self, input: ResumeInput) -> Result<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(Error::shutdown());
        };
        trace!(task = %self.token.task, "event completion fired");
        let wakeups = {
            let mut state = shared.state.lock();
            state.complete_event(self.token.task, self.token.seq, input)?
        };
        exec::perform(&shared, wakeups);
        Ok(())
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
