//! Terminal outcomes of tasks.
//!
//! A task finishes in exactly one of three ways: it completes with a value,
//! fails with a computation error, or is cancelled. [`Outcome`] is the
//! type-erased form stored in the task's result slot; [`Disposition`] is the
//! cheap cloneable summary handed to lifecycle hooks, joiners, and logs.
//!
//! The value payload is erased (`Box<dyn Any + Send>`) because the runtime
//! stores heterogeneous tasks in one arena; typed access goes through the
//! `JoinHandle`, which knows the output type and downcasts.

use crate::error::{Error, Result};
use crate::types::{CancelReason, TaskId};
use core::fmt;
use std::any::Any;

/// A type-erased task result payload.
pub type Payload = Box<dyn Any + Send>;

/// The type-erased terminal result of a task.
pub enum Outcome {
    /// The computation completed; the payload sits in the slot until the
    /// first consumer takes it.
    Completed(Option<Payload>),
    /// The computation failed.
    Failed(Error),
    /// The task was cancelled.
    Cancelled(CancelReason),
}

impl Outcome {
    /// Wraps a concrete value as a completed outcome.
    #[must_use]
    pub fn completed<T: Any + Send>(value: T) -> Self {
        Self::Completed(Some(Box::new(value)))
    }

    /// Wraps an already-boxed payload as a completed outcome.
    #[must_use]
    pub(crate) fn from_payload(payload: Payload) -> Self {
        Self::Completed(Some(payload))
    }

    /// Returns the cloneable summary of this outcome.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Completed(_) => Disposition::Completed,
            Self::Failed(err) => Disposition::Failed(err.clone()),
            Self::Cancelled(reason) => Disposition::Cancelled(*reason),
        }
    }

    /// Returns true if the task completed with a value.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns true if the task failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if the task was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Takes the payload out of a completed outcome, if still present.
    pub(crate) fn take_payload(&mut self) -> Option<Payload> {
        match self {
            Self::Completed(slot) => slot.take(),
            _ => None,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(Some(_)) => write!(f, "Completed(<payload>)"),
            Self::Completed(None) => write!(f, "Completed(<taken>)"),
            Self::Failed(err) => write!(f, "Failed({err})"),
            Self::Cancelled(reason) => write!(f, "Cancelled({reason})"),
        }
    }
}

/// The cloneable summary of a task's terminal state.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Completed with a (possibly already consumed) value.
    Completed,
    /// Failed with the given error.
    Failed(Error),
    /// Cancelled for the given reason.
    Cancelled(CancelReason),
}

impl Disposition {
    /// Returns true for a normal completion.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true for a failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true for a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the cancel reason if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Converts the summary into a unit result: failures become their error,
    /// cancellations become the join-boundary signal.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Failed(err) => Err(err),
            Self::Cancelled(reason) => Err(Error::cancelled(reason)),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
        }
    }
}

/// A task's identity paired with its terminal summary.
///
/// Delivered to `on_complete` hooks and returned by blocking joins.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// The task that terminated.
    pub task: TaskId,
    /// How it terminated.
    pub disposition: Disposition,
}

impl TaskReport {
    /// Creates a report.
    #[must_use]
    pub const fn new(task: TaskId, disposition: Disposition) -> Self {
        Self { task, disposition }
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.task, self.disposition)
    }
}
