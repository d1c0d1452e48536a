//! Deadline combinators.
//!
//! A timeout is a race: the wrapped computation runs in a nested fail-fast
//! scope, and a timer armed at start cancels that scope with a
//! [`CancelKind::Timeout`] reason if it fires first. The wrapper observes
//! whichever wins through a single await of the nested task:
//!
//! - the task's value, when the computation beats the clock;
//! - a cancelled-with-timeout await, when the clock wins;
//! - the task's own failure, which passes through untouched.
//!
//! Losing the race cancels the computation, it does not abandon it: the
//! wrapper's result is not produced until the nested scope's members have
//! actually wound down. A timer that fires after the race is decided finds
//! the nested scope already closed and does nothing.
//!
//! [`CancelKind::Timeout`]: crate::types::CancelKind::Timeout

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::step::{Coroutine, ResumeInput, Step};
use crate::tracing_compat::trace;
use crate::types::{CancelReason, ScopePolicy, TaskId};
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Races `inner` against a deadline; the deadline is a failure.
///
/// Completes with the inner value if it finishes in time. If the deadline
/// elapses first, the inner computation is cancelled and the wrapper fails
/// with [`ErrorKind::Timeout`]. An inner failure propagates as-is.
///
/// [`ErrorKind::Timeout`]: crate::error::ErrorKind::Timeout
#[must_use]
pub fn timeout<C: Coroutine>(after: Duration, inner: C) -> Timeout<C> {
    Timeout {
        state: RaceState::Init { after, inner },
    }
}

/// Races `inner` against a deadline; the deadline is an absent value.
///
/// Completes with `Some(value)` if the inner computation finishes in time
/// and `None` if the deadline elapses first. An inner failure propagates
/// as-is.
#[must_use]
pub fn timeout_or_none<C: Coroutine>(after: Duration, inner: C) -> TimeoutOrNone<C> {
    TimeoutOrNone {
        state: RaceState::Init { after, inner },
    }
}

enum RaceState<C> {
    Init { after: Duration, inner: C },
    Racing { child: TaskId },
    Done,
}

/// Coroutine returned by [`timeout`].
pub struct Timeout<C> {
    state: RaceState<C>,
}

impl<C: Coroutine> Coroutine for Timeout<C> {
    type Output = C::Output;

    fn resume(&mut self, cx: &Cx, input: ResumeInput) -> Step<C::Output> {
        match std::mem::replace(&mut self.state, RaceState::Done) {
            RaceState::Init { after, inner } => {
                if let ResumeInput::Cancelled(reason) = input {
                    return Step::fail(Error::cancelled(reason));
                }
                let child = match arm(cx, after, inner) {
                    Ok(child) => child,
                    Err(err) => return Step::fail(err),
                };
                self.state = RaceState::Racing { child };
                Step::wait_for(child)
            }
            RaceState::Racing { .. } => match settle::<C::Output>(input) {
                RaceOutcome::Value(value) => Step::done(value),
                RaceOutcome::DeadlineHit => {
                    Step::fail(Error::timeout("deadline elapsed before completion"))
                }
                RaceOutcome::Failed(err) => Step::fail(err),
            },
            RaceState::Done => {
                Step::fail(Error::illegal_resume("timeout resumed after completion"))
            }
        }
    }
}

impl<C> fmt::Debug for Timeout<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout").finish_non_exhaustive()
    }
}

/// Coroutine returned by [`timeout_or_none`].
pub struct TimeoutOrNone<C> {
    state: RaceState<C>,
}

impl<C: Coroutine> Coroutine for TimeoutOrNone<C> {
    type Output = Option<C::Output>;

    fn resume(&mut self, cx: &Cx, input: ResumeInput) -> Step<Option<C::Output>> {
        match std::mem::replace(&mut self.state, RaceState::Done) {
            RaceState::Init { after, inner } => {
                if let ResumeInput::Cancelled(reason) = input {
                    return Step::fail(Error::cancelled(reason));
                }
                let child = match arm(cx, after, inner) {
                    Ok(child) => child,
                    Err(err) => return Step::fail(err),
                };
                self.state = RaceState::Racing { child };
                Step::wait_for(child)
            }
            RaceState::Racing { .. } => match settle::<C::Output>(input) {
                RaceOutcome::Value(value) => Step::done(Some(value)),
                RaceOutcome::DeadlineHit => Step::done(None),
                RaceOutcome::Failed(err) => Step::fail(err),
            },
            RaceState::Done => {
                Step::fail(Error::illegal_resume("timeout resumed after completion"))
            }
        }
    }
}

impl<C> fmt::Debug for TimeoutOrNone<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutOrNone").finish_non_exhaustive()
    }
}

/// Spawns `inner` into a fresh nested scope and arms the deadline cancel.
fn arm<C: Coroutine>(cx: &Cx, after: Duration, inner: C) -> Result<TaskId> {
    let scope = cx.open_scope(ScopePolicy::FailFast)?;
    let child = scope.spawn(inner)?;
    cx.cancel_scope_after(scope.id(), after, CancelReason::timeout());
    trace!(scope = %scope.id(), child = %child.id(), ?after, "deadline race armed");
    Ok(child.id())
}

enum RaceOutcome<T> {
    Value(T),
    DeadlineHit,
    Failed(Error),
}

/// Interprets the await of the racing child.
///
/// A cancelled-with-timeout await is the armed deadline reporting in; any
/// other failure belongs to the computation itself. A cancellation of the
/// wrapper propagates as the wrapper's own cancellation.
fn settle<T: Any + Send>(input: ResumeInput) -> RaceOutcome<T> {
    match input {
        ResumeInput::Failed(err) if err.cancel_reason().is_some_and(|r| r.is_timeout()) => {
            RaceOutcome::DeadlineHit
        }
        ResumeInput::Failed(err) => RaceOutcome::Failed(err),
        ResumeInput::Cancelled(reason) => RaceOutcome::Failed(Error::cancelled(reason)),
        other => match other.into_value::<T>() {
            Ok(value) => RaceOutcome::Value(value),
            Err(err) => RaceOutcome::Failed(err),
        },
    }
}
