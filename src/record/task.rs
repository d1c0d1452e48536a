//! Task record: one entry in the runtime's task table.
//!
//! A task is a spawned coroutine plus the bookkeeping the runtime needs to
//! drive it: lifecycle state, the parked continuation, the input staged for
//! its next resume, what it is currently waiting on, and who is waiting on
//! it. All mutation happens under the runtime state lock; the record itself
//! is plain data.

use crate::error::Error;
use crate::runtime::handle::ResultCell;
use crate::step::{ErasedCoroutine, ResumeInput};
use crate::types::{CancelReason, Outcome, ScopeId, TaskId, TaskReport};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle state of a task.
///
/// ```text
/// New ──► Active ──► Completing ──► Completed
///           │             │
///           ▼             ▼
///        Cancelling ──► Cancelled
/// ```
///
/// `New` tasks that are cancelled go straight to `Cancelled` without ever
/// executing. Once a task is `Cancelling` its terminal state is always
/// `Cancelled`, regardless of how its final segment returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Spawned but not yet executed (lazy tasks stay here until started).
    New,
    /// Body segments are running or suspended.
    Active,
    /// Body finished; waiting for children and nested scopes to quiesce.
    Completing,
    /// Cancellation requested; at most one more segment runs to observe it.
    Cancelling,
    /// Terminal: finished normally or with a failure.
    Completed,
    /// Terminal: cancellation won.
    Cancelled,
}

impl TaskState {
    /// True for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// True if segments of this task may still execute.
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::New | Self::Active | Self::Cancelling)
    }
}

/// What kind of wakeup a suspended task registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Parked on a timer deadline.
    Timer,
    /// Parked until the named task reaches a terminal state.
    Task(TaskId),
    /// Parked until a completion handle fires the armed event.
    Event,
}

/// Current suspension registration, tagged with the epoch it was made under.
///
/// The epoch increments on every suspension, so a wakeup armed for an
/// earlier suspension (a timer that lost a race against cancellation, say)
/// can be recognized as stale and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Not parked; either running, ready, or terminal.
    Idle,
    /// Parked with a registered wakeup.
    Waiting {
        /// What the wakeup is.
        kind: WaitKind,
        /// Epoch the registration was made under.
        epoch: u64,
    },
}

/// State of the task's external-completion slot.
///
/// [`crate::Cx::event`] arms the slot and hands out a completion handle.
/// The slot absorbs the race between the handle firing and the task reaching
/// its suspension point: a fire that arrives first parks the input in
/// `Fired` until the task suspends and consumes it.
#[derive(Debug)]
pub enum EventSlot {
    /// No event armed.
    Vacant,
    /// Armed; the matching handle has not fired yet.
    Armed {
        /// Sequence number the handle must present.
        seq: u64,
    },
    /// The handle fired before the task suspended; input parked here.
    Fired {
        /// Sequence number the fire arrived under.
        seq: u64,
        /// The input to deliver once the task suspends on this event.
        input: ResumeInput,
    },
    /// Input delivered; any further fire for this sequence is a double
    /// resume.
    Consumed {
        /// Sequence number that was consumed.
        seq: u64,
    },
}

/// Internal record for one task.
pub struct TaskRecord {
    /// This task's id.
    pub id: TaskId,
    /// Scope this task is a member of.
    pub scope: ScopeId,
    /// Spawning task, if spawned from inside another task.
    pub parent: Option<TaskId>,
    /// Lifecycle state.
    pub state: TaskState,
    /// Whether the task has ever been submitted to the dispatcher.
    pub started: bool,
    /// Direct child tasks (spawned from this task's segments).
    pub children: Vec<TaskId>,
    /// Scopes opened by this task's segments and not yet closed.
    pub nested_scopes: Vec<ScopeId>,
    /// The parked coroutine. Taken out while a segment executes, so a task
    /// can never run on two workers at once.
    pub continuation: Option<Box<dyn ErasedCoroutine>>,
    /// Input for the next resume. `None` means [`ResumeInput::Start`].
    pub staged: Option<ResumeInput>,
    /// Current suspension registration.
    pub wait: WaitState,
    /// Bumped on every suspension; stamps wakeup registrations.
    pub epoch: u64,
    /// Bumped on every event armed; stamps completion handles.
    pub event_seq: u64,
    /// External-completion slot.
    pub event: EventSlot,
    /// Set on cancellation; segments poll this via [`crate::Cx::is_cancelled`].
    pub cancel_flag: Arc<AtomicBool>,
    /// Why this task is being cancelled, once it is.
    pub cancel_reason: Option<CancelReason>,
    /// Whether the one cancellation-delivery resume has happened.
    pub cancel_delivered: bool,
    /// Own body outcome, parked while `Completing` waits for children.
    pub pending_outcome: Option<Outcome>,
    /// First failure handed over by a nested scope when it closed. Outranks
    /// a pending normal completion when the task finalizes.
    pub nested_failure: Option<Error>,
    /// Where the terminal outcome lands; shared with join handles.
    pub cell: Arc<ResultCell>,
    /// Tasks suspended on this task's completion.
    pub waiters: SmallVec<[TaskId; 4]>,
    /// Invoked once with the final report when the task reaches a terminal
    /// state.
    pub on_complete: Option<Box<dyn FnOnce(TaskReport) + Send>>,
    /// Invoked once when cancellation is first requested.
    pub on_cancel: Option<Box<dyn FnOnce(CancelReason) + Send>>,
    /// Segments executed so far.
    pub steps: u64,
}

impl TaskRecord {
    /// Creates a record in the `New` state.
    #[must_use]
    pub fn new(
        id: TaskId,
        scope: ScopeId,
        parent: Option<TaskId>,
        continuation: Box<dyn ErasedCoroutine>,
        cell: Arc<ResultCell>,
    ) -> Self {
        Self {
            id,
            scope,
            parent,
            state: TaskState::New,
            started: false,
            children: Vec::new(),
            nested_scopes: Vec::new(),
            continuation: Some(continuation),
            staged: None,
            wait: WaitState::Idle,
            epoch: 0,
            event_seq: 0,
            event: EventSlot::Vacant,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            cancel_reason: None,
            cancel_delivered: false,
            pending_outcome: None,
            nested_failure: None,
            cell,
            waiters: SmallVec::new(),
            on_complete: None,
            on_cancel: None,
            steps: 0,
        }
    }

    /// True for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Checks out the continuation and staged input for one segment run.
    ///
    /// Returns `None` when the task has nothing to run: already terminal,
    /// completing, or its continuation is checked out by another worker. A
    /// `New` task transitions to `Active` here.
    pub fn begin(&mut self) -> Option<(Box<dyn ErasedCoroutine>, ResumeInput)> {
        match self.state {
            TaskState::New => self.state = TaskState::Active,
            TaskState::Active | TaskState::Cancelling => {}
            TaskState::Completing | TaskState::Completed | TaskState::Cancelled => return None,
        }
        let continuation = self.continuation.take()?;
        let input = self.staged.take().unwrap_or(ResumeInput::Start);
        if let ResumeInput::Cancelled(_) = &input {
            self.cancel_delivered = true;
        }
        self.wait = WaitState::Idle;
        self.steps += 1;
        Some((continuation, input))
    }

    /// Registers a suspension under a fresh epoch and returns that epoch.
    pub fn register_wait(&mut self, kind: WaitKind) -> u64 {
        self.epoch += 1;
        self.wait = WaitState::Waiting {
            kind,
            epoch: self.epoch,
        };
        self.epoch
    }

    /// Stages the input for the next resume, replacing anything staged.
    ///
    /// Cancellation uses the replacement deliberately: a wakeup that raced
    /// with a cancel loses, and the task observes the cancel instead.
    pub fn stage(&mut self, input: ResumeInput) {
        self.staged = Some(input);
    }

    /// Clears the suspension registration if it matches `epoch`.
    ///
    /// Returns false for a stale wakeup, which the caller drops.
    pub fn clear_wait(&mut self, epoch: u64) -> bool {
        match self.wait {
            WaitState::Waiting { epoch: e, .. } if e == epoch => {
                self.wait = WaitState::Idle;
                true
            }
            _ => false,
        }
    }

    /// True if currently parked on `target`'s completion.
    #[must_use]
    pub fn waiting_on_task(&self, target: TaskId) -> bool {
        matches!(
            self.wait,
            WaitState::Waiting {
                kind: WaitKind::Task(t),
                ..
            } if t == target
        )
    }

    /// True if currently parked on the armed event.
    #[must_use]
    pub const fn waiting_on_event(&self) -> bool {
        matches!(
            self.wait,
            WaitState::Waiting {
                kind: WaitKind::Event,
                ..
            }
        )
    }

    /// Arms the event slot under a fresh sequence number.
    ///
    /// A previously armed or fired event is superseded; its handle will get
    /// an illegal-resume error if it fires later.
    pub fn arm_event(&mut self) -> u64 {
        self.event_seq += 1;
        self.event = EventSlot::Armed {
            seq: self.event_seq,
        };
        self.event_seq
    }

    /// Moves `Active` or `Completing` into `Cancelling`, recording the first
    /// reason and raising the poll flag.
    ///
    /// Returns false when the task is already cancelling or terminal, making
    /// repeated cancels idempotent.
    pub fn mark_cancelling(&mut self, reason: CancelReason) -> bool {
        match self.state {
            TaskState::Active | TaskState::Completing => {
                self.state = TaskState::Cancelling;
                self.cancel_reason = Some(reason);
                self.cancel_flag.store(true, Ordering::Relaxed);
                true
            }
            TaskState::New | TaskState::Cancelling | TaskState::Completed
            | TaskState::Cancelled => false,
        }
    }

    /// Adds `waiter` to the completion list, deduplicated.
    pub fn add_waiter(&mut self, waiter: TaskId) {
        if !self.waiters.contains(&waiter) {
            self.waiters.push(waiter);
        }
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .field("wait", &self.wait)
            .field("epoch", &self.epoch)
            .field("children", &self.children)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{erase, from_fn, Step};
    use crate::util::ArenaIndex;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskId::from_arena(ArenaIndex::new(0, 0)),
            ScopeId::from_arena(ArenaIndex::new(0, 0)),
            None,
            erase(from_fn(|_cx, _input| Step::done(()))),
            Arc::new(ResultCell::new()),
        )
    }

    #[test]
    fn begin_moves_new_to_active_and_checks_out() {
        let mut t = record();
        assert_eq!(t.state, TaskState::New);

        let (cont, input) = t.begin().unwrap();
        assert_eq!(t.state, TaskState::Active);
        assert!(matches!(input, ResumeInput::Start));
        assert!(t.continuation.is_none());

        // A second worker popping the same id finds nothing to run.
        assert!(t.begin().is_none());
        t.continuation = Some(cont);
    }

    #[test]
    fn begin_refuses_terminal_and_completing() {
        let mut t = record();
        t.state = TaskState::Completing;
        assert!(t.begin().is_none());
        t.state = TaskState::Completed;
        assert!(t.begin().is_none());
    }

    #[test]
    fn staged_input_is_taken_once() {
        let mut t = record();
        t.stage(ResumeInput::value(5_u8));
        let (cont, input) = t.begin().unwrap();
        assert_eq!(input.into_value::<u8>().unwrap(), 5);
        t.continuation = Some(cont);
        let (_, input) = t.begin().unwrap();
        assert!(matches!(input, ResumeInput::Start));
    }

    #[test]
    fn begin_marks_cancellation_delivered() {
        let mut t = record();
        t.state = TaskState::Active;
        assert!(t.mark_cancelling(CancelReason::explicit("stop")));
        t.stage(ResumeInput::Cancelled(CancelReason::explicit("stop")));
        assert!(!t.cancel_delivered);
        let _ = t.begin().unwrap();
        assert!(t.cancel_delivered);
    }

    #[test]
    fn mark_cancelling_is_idempotent() {
        let mut t = record();
        t.state = TaskState::Active;
        assert!(t.mark_cancelling(CancelReason::timeout()));
        assert!(!t.mark_cancelling(CancelReason::explicit("again")));
        assert_eq!(
            t.cancel_reason.map(|r| r.kind()),
            Some(crate::types::CancelKind::Timeout)
        );
        assert!(t.cancel_flag.load(Ordering::Relaxed));
    }

    #[test]
    fn mark_cancelling_skips_new_and_terminal() {
        let mut t = record();
        assert!(!t.mark_cancelling(CancelReason::explicit("too early")));
        t.state = TaskState::Cancelled;
        assert!(!t.mark_cancelling(CancelReason::explicit("too late")));
    }

    #[test]
    fn wait_registration_and_stale_epochs() {
        let mut t = record();
        let first = t.register_wait(WaitKind::Timer);
        assert!(matches!(t.wait, WaitState::Waiting { .. }));

        assert!(t.clear_wait(first));
        assert_eq!(t.wait, WaitState::Idle);

        let second = t.register_wait(WaitKind::Timer);
        assert_ne!(first, second);
        // The old timer firing late is recognized as stale.
        assert!(!t.clear_wait(first));
        assert!(matches!(t.wait, WaitState::Waiting { .. }));
    }

    #[test]
    fn waiting_on_task_matches_target_only() {
        let mut t = record();
        let target = TaskId::new_for_test(7, 0);
        let other = TaskId::new_for_test(8, 0);
        t.register_wait(WaitKind::Task(target));
        assert!(t.waiting_on_task(target));
        assert!(!t.waiting_on_task(other));
        assert!(!t.waiting_on_event());
    }

    #[test]
    fn arm_event_supersedes_previous() {
        let mut t = record();
        let a = t.arm_event();
        let b = t.arm_event();
        assert_ne!(a, b);
        assert!(matches!(t.event, EventSlot::Armed { seq } if seq == b));
    }

    #[test]
    fn waiters_are_deduplicated() {
        let mut t = record();
        let w = TaskId::new_for_test(3, 0);
        t.add_waiter(w);
        t.add_waiter(w);
        assert_eq!(t.waiters.len(), 1);
    }
}
