//! The suspension protocol: coroutines, resume inputs, and wait conditions.
//!
//! A [`Coroutine`] is an explicit state machine. Each call to
//! [`Coroutine::resume`] runs one segment to the next suspension point or to
//! completion; the machine's fields are its saved locals and the current
//! resume point. Control transfers are values:
//!
//! - [`ResumeInput`] is what the runtime passes back in when a segment runs:
//!   the initial [`ResumeInput::Start`], a value produced by whatever the
//!   task was waiting on, a failure from it, or a cancellation notice.
//! - [`Step`] is what a segment hands back out: either
//!   [`Step::Suspend`] with the [`Wait`] condition that must be satisfied
//!   before the next resume, or [`Step::Complete`] with the task's result.
//!
//! A suspended coroutine is inert data. It holds no thread and costs nothing
//! until the runtime resumes it.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::types::{CancelReason, Payload, TaskId};
use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use core::time::Duration;

/// Names one pending external completion for a suspended task.
///
/// Obtained from [`Cx::event`] together with the [`crate::Completion`]
/// handle that will fire it. The sequence number ties the token to a single
/// suspension, so a handle kept around after its event fired cannot resume
/// the task a second time.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EventToken {
    pub(crate) task: TaskId,
    pub(crate) seq: u64,
}

impl fmt::Debug for EventToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventToken({}#{})", self.task, self.seq)
    }
}

/// What a suspended task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Resume after the given duration has elapsed.
    Timer(Duration),
    /// Resume when the named task reaches a terminal state; the resume input
    /// carries that task's outcome.
    Task(TaskId),
    /// Resume when the matching [`crate::Completion`] handle fires.
    Event(EventToken),
    /// Resume as soon as the scheduler gets back around to this task.
    Yield,
}

/// The input a segment receives when it is resumed.
///
/// Exactly one of these is consumed per segment execution. What it carries
/// depends on the [`Wait`] the previous segment suspended on.
pub enum ResumeInput {
    /// First execution of a coroutine; nothing was waited on yet.
    Start,
    /// The wait produced a value: a finished child's result, an event
    /// payload, or the unit value for timers and yields.
    Value(Payload),
    /// The wait produced a failure: the awaited task failed, or the event
    /// was completed exceptionally.
    Failed(Error),
    /// This task was cancelled while suspended. The segment should release
    /// what it holds and return; the runtime records the task as cancelled
    /// regardless of what the segment returns after this input.
    Cancelled(CancelReason),
}

impl ResumeInput {
    /// Wraps a typed value for delivery to a resumed segment.
    #[must_use]
    pub fn value<T: Any + Send>(value: T) -> Self {
        Self::Value(Box::new(value))
    }

    /// The unit payload used for timer and yield wakeups.
    #[must_use]
    pub fn unit() -> Self {
        Self::Value(Box::new(()))
    }

    /// True if this input is a cancellation notice.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Extracts the typed value this input carries.
    ///
    /// # Errors
    ///
    /// Returns the carried failure for [`ResumeInput::Failed`], a
    /// cancellation error for [`ResumeInput::Cancelled`], and a computation
    /// error when no value is present or the payload has the wrong type.
    pub fn into_value<T: Any + Send>(self) -> Result<T> {
        match self {
            Self::Value(payload) => payload
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| Error::computation("resume value had an unexpected type")),
            Self::Failed(err) => Err(err),
            Self::Cancelled(reason) => Err(Error::cancelled(reason)),
            Self::Start => Err(Error::computation("expected a resume value, got start")),
        }
    }

    /// Consumes an input whose value does not matter, keeping only whether
    /// the wait ended normally. Timer and yield wakeups go through here.
    ///
    /// # Errors
    ///
    /// Returns the carried failure or a cancellation error.
    pub fn acknowledge(self) -> Result<()> {
        match self {
            Self::Start | Self::Value(_) => Ok(()),
            Self::Failed(err) => Err(err),
            Self::Cancelled(reason) => Err(Error::cancelled(reason)),
        }
    }
}

impl fmt::Debug for ResumeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Value(_) => write!(f, "Value(<payload>)"),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            Self::Cancelled(reason) => f.debug_tuple("Cancelled").field(reason).finish(),
        }
    }
}

/// The outcome of running one segment.
#[derive(Debug)]
pub enum Step<T> {
    /// The segment reached a suspension point. The runtime parks the task
    /// until the wait condition is satisfied.
    Suspend(Wait),
    /// The coroutine finished with a result. It will not be resumed again.
    Complete(Result<T>),
}

impl<T> Step<T> {
    /// Completes with a value.
    #[must_use]
    pub const fn done(value: T) -> Self {
        Self::Complete(Ok(value))
    }

    /// Completes with a failure.
    #[must_use]
    pub const fn fail(err: Error) -> Self {
        Self::Complete(Err(err))
    }

    /// Suspends until `after` has elapsed.
    #[must_use]
    pub const fn sleep(after: Duration) -> Self {
        Self::Suspend(Wait::Timer(after))
    }

    /// Suspends until `task` is terminal.
    #[must_use]
    pub const fn wait_for(task: TaskId) -> Self {
        Self::Suspend(Wait::Task(task))
    }

    /// Suspends until the event named by `token` fires.
    #[must_use]
    pub const fn wait_event(token: EventToken) -> Self {
        Self::Suspend(Wait::Event(token))
    }

    /// Suspends and immediately requeues, letting other ready tasks run.
    #[must_use]
    pub const fn yield_now() -> Self {
        Self::Suspend(Wait::Yield)
    }
}

/// A suspendable unit of work, written as an explicit state machine.
///
/// Implementations keep their resume point and locals as fields and advance
/// in `resume`. The runtime guarantees each coroutine runs on at most one
/// worker at a time, so `resume` never races with itself; `&mut self` is the
/// whole synchronization story.
///
/// Cancellation is cooperative: a running segment is never interrupted. It
/// observes cancellation either by polling [`Cx::is_cancelled`] or by
/// receiving [`ResumeInput::Cancelled`] at its next resume.
pub trait Coroutine: Send + 'static {
    /// The value this coroutine completes with.
    type Output: Send + 'static;

    /// Runs one segment: from the current resume point to the next
    /// suspension or to completion.
    fn resume(&mut self, cx: &Cx, input: ResumeInput) -> Step<Self::Output>;
}

/// Builds a coroutine from a closure over `(cx, input)`.
///
/// The closure is the whole state machine; captured state plus whatever it
/// keys off the input stand in for named resume points. Handy for small
/// machines and tests.
pub fn from_fn<T, F>(f: F) -> FromFn<F, T>
where
    F: FnMut(&Cx, ResumeInput) -> Step<T> + Send + 'static,
    T: Send + 'static,
{
    FromFn {
        f,
        _marker: PhantomData,
    }
}

/// Coroutine returned by [`from_fn`].
pub struct FromFn<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> Coroutine for FromFn<F, T>
where
    F: FnMut(&Cx, ResumeInput) -> Step<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn resume(&mut self, cx: &Cx, input: ResumeInput) -> Step<T> {
        (self.f)(cx, input)
    }
}

impl<F, T> fmt::Debug for FromFn<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Completes after a fixed delay without holding a thread.
#[derive(Debug)]
pub struct Sleep {
    state: SleepState,
}

#[derive(Debug, Clone, Copy)]
enum SleepState {
    Init(Duration),
    Waiting,
    Done,
}

impl Sleep {
    /// A coroutine that suspends for `after` and then completes.
    #[must_use]
    pub const fn new(after: Duration) -> Self {
        Self {
            state: SleepState::Init(after),
        }
    }
}

impl Coroutine for Sleep {
    type Output = ();

    fn resume(&mut self, _cx: &Cx, input: ResumeInput) -> Step<()> {
        match self.state {
            SleepState::Init(after) => {
                if let ResumeInput::Cancelled(reason) = input {
                    self.state = SleepState::Done;
                    return Step::fail(Error::cancelled(reason));
                }
                self.state = SleepState::Waiting;
                Step::sleep(after)
            }
            SleepState::Waiting => {
                self.state = SleepState::Done;
                Step::Complete(input.acknowledge())
            }
            SleepState::Done => Step::fail(Error::illegal_resume("sleep resumed after completion")),
        }
    }
}

/// Suspends once so other ready tasks get a turn, then completes.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    /// A coroutine that yields exactly once.
    #[must_use]
    pub const fn new() -> Self {
        Self { yielded: false }
    }
}

impl Coroutine for YieldNow {
    type Output = ();

    fn resume(&mut self, _cx: &Cx, input: ResumeInput) -> Step<()> {
        if self.yielded {
            Step::Complete(input.acknowledge())
        } else {
            if let ResumeInput::Cancelled(reason) = input {
                return Step::fail(Error::cancelled(reason));
            }
            self.yielded = true;
            Step::yield_now()
        }
    }
}

/// Step alias used once outputs have been type-erased for record storage.
pub(crate) enum ErasedStep {
    Suspend(Wait),
    Complete(Result<Payload>),
}

impl fmt::Debug for ErasedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspend(wait) => f.debug_tuple("Suspend").field(wait).finish(),
            Self::Complete(Ok(_)) => write!(f, "Complete(Ok(<payload>))"),
            Self::Complete(Err(err)) => write!(f, "Complete(Err({err}))"),
        }
    }
}

/// Object-safe view of a coroutine with its output boxed.
///
/// Task records store these; the typed output is recovered by the awaiting
/// side via downcast.
pub(crate) trait ErasedCoroutine: Send {
    fn resume_erased(&mut self, cx: &Cx, input: ResumeInput) -> ErasedStep;
}

struct Erased<C: Coroutine> {
    inner: C,
}

impl<C: Coroutine> ErasedCoroutine for Erased<C> {
    fn resume_erased(&mut self, cx: &Cx, input: ResumeInput) -> ErasedStep {
        match self.inner.resume(cx, input) {
            Step::Suspend(wait) => ErasedStep::Suspend(wait),
            Step::Complete(Ok(value)) => ErasedStep::Complete(Ok(Box::new(value) as Payload)),
            Step::Complete(Err(err)) => ErasedStep::Complete(Err(err)),
        }
    }
}

pub(crate) fn erase<C: Coroutine>(coroutine: C) -> Box<dyn ErasedCoroutine> {
    Box::new(Erased { inner: coroutine })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn into_value_downcasts() {
        let input = ResumeInput::value(41_u32);
        assert_eq!(input.into_value::<u32>().unwrap(), 41);
    }

    #[test]
    fn into_value_rejects_wrong_type() {
        let input = ResumeInput::value("text");
        let err = input.into_value::<u64>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
    }

    #[test]
    fn into_value_surfaces_failure_and_cancellation() {
        let failed = ResumeInput::Failed(Error::computation("boom"));
        assert_eq!(failed.into_value::<u32>().unwrap_err().kind(), ErrorKind::Computation);

        let cancelled = ResumeInput::Cancelled(CancelReason::explicit("test"));
        let err = cancelled.into_value::<u32>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.cancel_reason().is_some());
    }

    #[test]
    fn acknowledge_passes_values_and_start() {
        assert!(ResumeInput::Start.acknowledge().is_ok());
        assert!(ResumeInput::unit().acknowledge().is_ok());
        assert!(ResumeInput::Failed(Error::computation("x")).acknowledge().is_err());
    }

    #[test]
    fn sleep_machine_walks_init_wait_done() {
        let cx = Cx::for_testing();
        let mut sleep = Sleep::new(Duration::from_millis(5));

        match sleep.resume(&cx, ResumeInput::Start) {
            Step::Suspend(Wait::Timer(after)) => assert_eq!(after, Duration::from_millis(5)),
            other => panic!("expected timer suspend, got {other:?}"),
        }
        match sleep.resume(&cx, ResumeInput::unit()) {
            Step::Complete(Ok(())) => {}
            other => panic!("expected completion, got {other:?}"),
        }
        match sleep.resume(&cx, ResumeInput::unit()) {
            Step::Complete(Err(err)) => assert_eq!(err.kind(), ErrorKind::IllegalResume),
            other => panic!("expected illegal resume, got {other:?}"),
        }
    }

    #[test]
    fn sleep_cancelled_before_arming() {
        let cx = Cx::for_testing();
        let mut sleep = Sleep::new(Duration::from_secs(1));
        match sleep.resume(&cx, ResumeInput::Cancelled(CancelReason::explicit("early"))) {
            Step::Complete(Err(err)) => assert_eq!(err.kind(), ErrorKind::Cancelled),
            other => panic!("expected cancelled completion, got {other:?}"),
        }
    }

    #[test]
    fn yield_now_suspends_once() {
        let cx = Cx::for_testing();
        let mut y = YieldNow::new();
        match y.resume(&cx, ResumeInput::Start) {
            Step::Suspend(Wait::Yield) => {}
            other => panic!("expected yield suspend, got {other:?}"),
        }
        match y.resume(&cx, ResumeInput::unit()) {
            Step::Complete(Ok(())) => {}
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn from_fn_closure_drives_state() {
        let cx = Cx::for_testing();
        let mut counter = 0_u32;
        let mut machine = from_fn(move |_cx, input| {
            counter += 1;
            match input {
                ResumeInput::Start => Step::yield_now(),
                _ => Step::done(counter),
            }
        });
        assert!(matches!(machine.resume(&cx, ResumeInput::Start), Step::Suspend(Wait::Yield)));
        match machine.resume(&cx, ResumeInput::unit()) {
            Step::Complete(Ok(2)) => {}
            other => panic!("expected count of 2, got {other:?}"),
        }
    }

    #[test]
    fn erased_coroutine_boxes_output() {
        let cx = Cx::for_testing();
        let mut erased = erase(from_fn(|_cx, _input| Step::done(99_u64)));
        match erased.resume_erased(&cx, ResumeInput::Start) {
            ErasedStep::Complete(Ok(payload)) => {
                assert_eq!(payload.downcast::<u64>().map(|b| *b).ok(), Some(99));
            }
            other => panic!("expected erased completion, got {other:?}"),
        }
    }
}
