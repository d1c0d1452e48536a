//! Global runtime state: the task and scope tables plus every transition.
//!
//! All structured-concurrency semantics live here as synchronous functions
//! over plain records. An operation mutates the tables and returns a
//! [`Wakeups`] describing what the caller must do next: which tasks became
//! ready, which timers to arm, which completion hooks to run. Nothing in
//! this module touches a dispatcher, a condvar, or a clock, which keeps
//! every transition unit-testable without threads.
//!
//! The caller (the executor in [`crate::runtime::exec`], or the lab driver)
//! holds the state behind a single mutex and applies the wakeups after
//! releasing it.

use crate::error::{Error, ErrorKind, Result};
use crate::record::{EventSlot, ScopeRecord, TaskRecord, TaskState, WaitKind, WaitState};
use crate::runtime::handle::ResultCell;
use crate::step::{ErasedCoroutine, ErasedStep, EventToken, ResumeInput, Wait};
use crate::tracing_compat::{debug, trace};
use crate::types::{
    CancelReason, Disposition, FailureAction, Outcome, ScopeId, ScopePolicy, TaskId, TaskReport,
};
use crate::util::Arena;
use smallvec::SmallVec;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// A timer the caller must arm with the runtime's timer service.
#[derive(Debug, Clone, Copy)]
pub struct TimerRequest {
    /// Task to wake when the timer fires.
    pub task: TaskId,
    /// Suspension epoch the wakeup is valid for.
    pub epoch: u64,
    /// Delay until the wakeup.
    pub after: Duration,
}

/// Deferred effects of a state transition.
///
/// Transitions never call user code or touch the scheduler while the state
/// lock is held; they accumulate the work here and the caller applies it
/// after unlocking.
#[derive(Default)]
pub struct Wakeups {
    /// Tasks to submit to the dispatcher.
    pub ready: SmallVec<[TaskId; 4]>,
    /// Timers to arm.
    pub timers: SmallVec<[TimerRequest; 2]>,
    /// Completion and cancellation hooks, pre-bound to their arguments.
    pub hooks: Vec<Box<dyn FnOnce() + Send>>,
    /// Whether blocked joiners should be woken.
    pub notify: bool,
}

impl Wakeups {
    /// True when there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.timers.is_empty() && self.hooks.is_empty() && !self.notify
    }
}

impl std::fmt::Debug for Wakeups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wakeups")
            .field("ready", &self.ready)
            .field("timers", &self.timers)
            .field("hooks", &self.hooks.len())
            .field("notify", &self.notify)
            .finish()
    }
}

/// Everything needed to spawn one task.
pub struct SpawnRequest {
    /// Scope that will own the task.
    pub scope: ScopeId,
    /// Spawning task, when spawned from inside a segment.
    pub parent: Option<TaskId>,
    /// The coroutine to drive.
    pub continuation: Box<dyn ErasedCoroutine>,
    /// Lazy tasks stay `New` until explicitly started or joined.
    pub lazy: bool,
    /// Hook invoked with the final report.
    pub on_complete: Option<Box<dyn FnOnce(TaskReport) + Send>>,
    /// Hook invoked when cancellation is first requested.
    pub on_cancel: Option<Box<dyn FnOnce(CancelReason) + Send>>,
}

/// Result of a successful spawn.
#[derive(Debug)]
pub struct Spawned {
    /// The new task's id.
    pub task: TaskId,
    /// Outcome cell shared with join handles.
    pub cell: Arc<ResultCell>,
    /// Whether the caller should submit the task to the dispatcher now.
    pub submit: bool,
}

/// What an executor needs to run one segment of a task.
pub struct StepGrant {
    /// The task being run.
    pub task: TaskId,
    /// Scope the task belongs to.
    pub scope: ScopeId,
    /// The checked-out coroutine. Must be handed back via
    /// [`RuntimeState::finish_step`] unless the segment panicked.
    pub continuation: Box<dyn ErasedCoroutine>,
    /// Input for this resume.
    pub input: ResumeInput,
    /// The task's cancellation flag, for building its `Cx`.
    pub cancel_flag: Arc<AtomicBool>,
}

/// The task and scope tables.
pub struct RuntimeState {
    /// All live task records.
    pub tasks: Arena<TaskRecord>,
    /// All live scope records.
    pub scopes: Arena<ScopeRecord>,
    /// Root scopes (no parent), for shutdown and handle lookup.
    pub roots: Vec<ScopeId>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeState {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Arena::new(),
            scopes: Arena::new(),
            roots: Vec::new(),
        }
    }

    /// Looks up a task record.
    #[must_use]
    pub fn task(&self, task: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(task.arena_index())
    }

    fn task_mut(&mut self, task: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(task.arena_index())
    }

    /// Looks up a scope record.
    #[must_use]
    pub fn scope(&self, scope: ScopeId) -> Option<&ScopeRecord> {
        self.scopes.get(scope.arena_index())
    }

    fn scope_mut(&mut self, scope: ScopeId) -> Option<&mut ScopeRecord> {
        self.scopes.get_mut(scope.arena_index())
    }

    /// Current lifecycle state of a task, if its record is still live.
    #[must_use]
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.task(task).map(|t| t.state)
    }

    /// Number of tasks not yet terminal.
    #[must_use]
    pub fn live_task_count(&self) -> usize {
        self.tasks.iter().filter(|(_, t)| !t.is_terminal()).count()
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Opens a root scope. Roots have no parent, so admission cannot fail.
    pub fn create_root_scope(&mut self, policy: ScopePolicy) -> ScopeId {
        self.insert_scope(None, None, policy)
    }

    /// Opens a scope nested under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] if the parent scope no longer
    /// accepts members.
    pub fn create_scope(
        &mut self,
        parent: ScopeId,
        owner_task: Option<TaskId>,
        policy: ScopePolicy,
    ) -> Result<ScopeId> {
        let parent_record = self.scope(parent).ok_or_else(Error::scope_closed)?;
        if !parent_record.state.can_spawn() {
            return Err(Error::scope_closed());
        }
        Ok(self.insert_scope(Some(parent), owner_task, policy))
    }

    fn insert_scope(
        &mut self,
        parent: Option<ScopeId>,
        owner_task: Option<TaskId>,
        policy: ScopePolicy,
    ) -> ScopeId {
        let idx = self
            .scopes
            .insert_with(|idx| ScopeRecord::new(ScopeId::from_arena(idx), parent, owner_task, policy));
        let id = ScopeId::from_arena(idx);

        match parent {
            Some(parent) => {
                if let Some(record) = self.scope_mut(parent) {
                    record.add_child_scope(id);
                }
            }
            None => self.roots.push(id),
        }
        if let Some(owner) = owner_task {
            if let Some(record) = self.task_mut(owner) {
                record.nested_scopes.push(id);
            }
        }

        debug!(scope = %id, parent = ?parent, policy = %policy, "scope opened");
        id
    }

    /// Marks a root scope to close once its members quiesce, and closes it
    /// immediately if they already have.
    pub fn seal_scope(&mut self, scope: ScopeId, wakeups: &mut Wakeups) {
        if let Some(record) = self.scope_mut(scope) {
            record.close_on_quiesce = true;
        }
        self.try_close_scope(scope, wakeups);
    }

    /// Removes a closed root scope and returns its recorded failure.
    ///
    /// Returns `None` while the scope is still open or draining; callers
    /// wait on the joiner condvar and retry. A scope whose record is gone
    /// entirely was already closed and taken (or was nested and consumed at
    /// close), so that reads as closed with nothing left to surface.
    pub fn take_closed_root(&mut self, scope: ScopeId) -> Option<Option<Error>> {
        let Some(record) = self.scope(scope) else {
            return Some(None);
        };
        if !record.state.is_terminal() {
            return None;
        }
        let record = self.scopes.remove(scope.arena_index())?;
        self.roots.retain(|&r| r != scope);
        Some(record.failure)
    }

    // ------------------------------------------------------------------
    // Spawning and starting
    // ------------------------------------------------------------------

    /// Admits a task into a scope.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ScopeClosed`] when the scope is cancelling or
    /// closed. A task can never be admitted into a scope that has started
    /// tearing down, so membership is decided atomically with admission.
    pub fn spawn(&mut self, request: SpawnRequest) -> Result<Spawned> {
        let SpawnRequest {
            scope,
            parent,
            continuation,
            lazy,
            on_complete,
            on_cancel,
        } = request;

        {
            let scope_record = self.scope(scope).ok_or_else(Error::scope_closed)?;
            if !scope_record.state.can_spawn() {
                return Err(Error::scope_closed());
            }
        }

        let cell = Arc::new(ResultCell::new());
        let cell_for_record = Arc::clone(&cell);
        let idx = self.tasks.insert_with(|idx| {
            let mut record = TaskRecord::new(
                TaskId::from_arena(idx),
                scope,
                parent,
                continuation,
                cell_for_record,
            );
            record.on_complete = on_complete;
            record.on_cancel = on_cancel;
            record
        });
        let task = TaskId::from_arena(idx);

        if let Some(scope_record) = self.scope_mut(scope) {
            scope_record.add_task(task);
        }
        if let Some(parent) = parent {
            if let Some(parent_record) = self.task_mut(parent) {
                parent_record.children.push(task);
            }
        }

        let submit = if lazy {
            false
        } else {
            if let Some(record) = self.task_mut(task) {
                record.started = true;
            }
            true
        };

        trace!(task = %task, scope = %scope, lazy, "task spawned");
        Ok(Spawned { task, cell, submit })
    }

    /// Starts a lazy task.
    ///
    /// Returns true if the caller should submit it to the dispatcher; false
    /// when it was already started, cancelled before starting, or unknown.
    pub fn start_task(&mut self, task: TaskId) -> bool {
        let Some(record) = self.task_mut(task) else {
            return false;
        };
        if record.started || record.is_terminal() {
            return false;
        }
        record.started = true;
        trace!(task = %task, "lazy task started");
        true
    }

    // ------------------------------------------------------------------
    // Executing segments
    // ------------------------------------------------------------------

    /// Checks out a task's continuation for one segment run.
    ///
    /// Returns `None` for stale queue entries: the task finished, was
    /// cancelled before starting, or is already running on another worker.
    pub fn begin_step(&mut self, task: TaskId) -> Option<StepGrant> {
        let record = self.task_mut(task)?;
        let scope = record.scope;
        let cancel_flag = Arc::clone(&record.cancel_flag);
        let (continuation, input) = record.begin()?;
        trace!(task = %task, step = record.steps, input = ?input, "segment start");
        Some(StepGrant {
            task,
            scope,
            continuation,
            input,
            cancel_flag,
        })
    }

    /// Applies the result of one segment run.
    ///
    /// `continuation` is the coroutine checked out by [`Self::begin_step`];
    /// pass `None` when the segment panicked and the machine is poisoned.
    pub fn finish_step(
        &mut self,
        task: TaskId,
        step: ErasedStep,
        continuation: Option<Box<dyn ErasedCoroutine>>,
    ) -> Wakeups {
        let mut wakeups = Wakeups::default();
        let Some(record) = self.task_mut(task) else {
            return wakeups;
        };

        match record.state {
            TaskState::Active => match step {
                ErasedStep::Suspend(wait) => {
                    record.continuation = continuation;
                    self.register_wait(task, wait, &mut wakeups);
                }
                ErasedStep::Complete(Ok(payload)) => {
                    self.settle_own(task, Outcome::from_payload(payload), &mut wakeups);
                }
                ErasedStep::Complete(Err(err)) if err.kind() == ErrorKind::Cancelled => {
                    // A propagated cancellation error means the task wound
                    // down in response to something it awaited being
                    // cancelled. That makes this task cancelled, not
                    // failed, and its siblings are left alone.
                    let reason = err.cancel_reason().unwrap_or_default();
                    self.settle_own(task, Outcome::Cancelled(reason), &mut wakeups);
                }
                ErasedStep::Complete(Err(err)) => {
                    self.settle_own(task, Outcome::Failed(err), &mut wakeups);
                }
            },
            TaskState::Cancelling => {
                let reason = record.cancel_reason.unwrap_or_default();
                if !record.cancel_delivered {
                    if let ErasedStep::Suspend(_) = step {
                        // The cancel arrived while this segment ran. The
                        // requested wait is not granted; the cancellation is
                        // staged and delivered on the immediate next resume.
                        record.continuation = continuation;
                        record.stage(ResumeInput::Cancelled(reason));
                        wakeups.ready.push(task);
                        return wakeups;
                    }
                }
                // Once cancelling, the terminal state is Cancelled no
                // matter how the final segment returned.
                self.settle_own(task, Outcome::Cancelled(reason), &mut wakeups);
            }
            TaskState::New
            | TaskState::Completing
            | TaskState::Completed
            | TaskState::Cancelled => {
                debug!(task = %task, state = ?record.state, "dropping step result for settled task");
            }
        }
        wakeups
    }

    fn register_wait(&mut self, task: TaskId, wait: Wait, wakeups: &mut Wakeups) {
        match wait {
            Wait::Yield => {
                if let Some(record) = self.task_mut(task) {
                    record.stage(ResumeInput::unit());
                }
                wakeups.ready.push(task);
            }
            Wait::Timer(after) => {
                if let Some(record) = self.task_mut(task) {
                    let epoch = record.register_wait(WaitKind::Timer);
                    wakeups.timers.push(TimerRequest { task, epoch, after });
                }
            }
            Wait::Task(target) => self.register_task_wait(task, target, wakeups),
            Wait::Event(token) => self.register_event_wait(task, token, wakeups),
        }
    }

    fn register_task_wait(&mut self, task: TaskId, target: TaskId, wakeups: &mut Wakeups) {
        enum Target {
            Missing,
            Terminal(Arc<ResultCell>),
            Live,
        }
        let status = match self.task(target) {
            None => Target::Missing,
            Some(t) if t.is_terminal() => Target::Terminal(Arc::clone(&t.cell)),
            Some(_) => Target::Live,
        };
        match status {
            Target::Missing => {
                if let Some(record) = self.task_mut(task) {
                    record.stage(ResumeInput::Failed(Error::unknown_task()));
                }
                wakeups.ready.push(task);
            }
            Target::Terminal(cell) => {
                // The awaited task already settled; resolve immediately
                // from its cell instead of parking.
                let input = cell.derive_waiter_input();
                if let Some(record) = self.task_mut(task) {
                    record.stage(input);
                }
                wakeups.ready.push(task);
            }
            Target::Live => {
                if let Some(t) = self.task_mut(target) {
                    t.add_waiter(task);
                }
                if let Some(record) = self.task_mut(task) {
                    record.register_wait(WaitKind::Task(target));
                }
            }
        }
    }

    fn register_event_wait(&mut self, task: TaskId, token: EventToken, wakeups: &mut Wakeups) {
        if token.task != task {
            self.settle_own(
                task,
                Outcome::Failed(Error::computation("event token belongs to another task")),
                wakeups,
            );
            return;
        }
        let Some(record) = self.task_mut(task) else {
            return;
        };
        match record.event {
            EventSlot::Armed { seq } if seq == token.seq => {
                record.register_wait(WaitKind::Event);
            }
            EventSlot::Fired { seq, .. } if seq == token.seq => {
                // The completion handle fired before the task suspended;
                // consume the parked input and stay ready.
                let EventSlot::Fired { input, .. } =
                    std::mem::replace(&mut record.event, EventSlot::Consumed { seq })
                else {
                    unreachable!("event slot changed underneath us");
                };
                record.stage(input);
                wakeups.ready.push(task);
            }
            _ => {
                self.settle_own(
                    task,
                    Outcome::Failed(Error::illegal_resume("event token is stale or consumed")),
                    wakeups,
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Settles a task whose body has produced its own outcome.
    ///
    /// If children or nested scopes are still live the task parks the
    /// outcome and waits for them (`Completing`); a failed or cancelled
    /// outcome cancels them instead of waiting for their natural end.
    fn settle_own(&mut self, task: TaskId, outcome: Outcome, wakeups: &mut Wakeups) {
        let (children, open_scopes) = {
            let Some(record) = self.task_mut(task) else {
                return;
            };
            record.continuation = None;
            record.staged = None;
            (record.children.clone(), record.nested_scopes.clone())
        };

        if !outcome.is_completed() {
            let reason = CancelReason::parent_cancelled();
            for child in children {
                self.request_cancel_task(child, reason, wakeups);
            }
            for scope in &open_scopes {
                self.cancel_scope(*scope, reason, wakeups);
            }
        }

        // The body is done, so any scope it opened closes as soon as the
        // scope's own members are done.
        for scope in open_scopes {
            if let Some(s) = self.scope_mut(scope) {
                s.close_on_quiesce = true;
            }
            self.try_close_scope(scope, wakeups);
        }

        if let Some(record) = self.task_mut(task) {
            record.pending_outcome = Some(outcome);
            if record.state != TaskState::Cancelling {
                record.state = TaskState::Completing;
            }
        }
        self.advance_completing(task, wakeups);
    }

    /// Finalizes a `Completing` or `Cancelling` task once its children and
    /// nested scopes are all done. No-op while any remain.
    fn advance_completing(&mut self, task: TaskId, wakeups: &mut Wakeups) {
        let Some(record) = self.task(task) else {
            return;
        };
        if !matches!(record.state, TaskState::Completing | TaskState::Cancelling)
            || record.pending_outcome.is_none()
        {
            return;
        }
        let children_done = record
            .children
            .iter()
            .all(|&c| self.task(c).is_none_or(TaskRecord::is_terminal));
        if !children_done || !record.nested_scopes.is_empty() {
            return;
        }

        let Some(record) = self.task_mut(task) else {
            return;
        };
        let pending = record
            .pending_outcome
            .take()
            .unwrap_or_else(|| Outcome::completed(()));
        let outcome = if record.state == TaskState::Cancelling {
            Outcome::Cancelled(record.cancel_reason.unwrap_or_default())
        } else {
            match (record.nested_failure.take(), pending) {
                // A failure collected by a nested scope outranks the
                // body's normal completion.
                (Some(err), Outcome::Completed(_)) => Outcome::Failed(err),
                (_, pending) => pending,
            }
        };
        self.finalize(task, outcome, wakeups);
    }

    /// Commits a terminal outcome: fills the cell, runs hooks, wakes
    /// waiters, advances the parent, and applies the scope failure policy.
    fn finalize(&mut self, task: TaskId, outcome: Outcome, wakeups: &mut Wakeups) {
        let Some(record) = self.task_mut(task) else {
            return;
        };
        debug_assert!(!record.is_terminal(), "task finalized twice");

        record.state = match &outcome {
            Outcome::Completed(_) | Outcome::Failed(_) => TaskState::Completed,
            Outcome::Cancelled(_) => TaskState::Cancelled,
        };
        record.continuation = None;
        record.staged = None;
        record.wait = WaitState::Idle;

        let disposition = outcome.disposition();
        let report = TaskReport::new(task, disposition.clone());
        let cell = Arc::clone(&record.cell);
        let waiters = std::mem::take(&mut record.waiters);
        let scope = record.scope;
        let parent = record.parent;
        if let Some(hook) = record.on_complete.take() {
            let hook_report = report.clone();
            wakeups.hooks.push(Box::new(move || hook(hook_report)));
        }
        cell.fill(outcome);

        debug!(task = %task, disposition = %report.disposition, "task settled");

        for waiter in waiters {
            let should_wake = self
                .task(waiter)
                .is_some_and(|w| w.waiting_on_task(task));
            if should_wake {
                let input = cell.derive_waiter_input();
                if let Some(w) = self.task_mut(waiter) {
                    w.stage(input);
                    w.wait = WaitState::Idle;
                }
                wakeups.ready.push(waiter);
            }
        }
        wakeups.notify = true;

        if let Some(parent) = parent {
            self.advance_completing(parent, wakeups);
        }
        self.on_member_terminal(scope, task, &disposition, wakeups);
    }

    /// Applies scope accounting and the failure policy after a member
    /// reaches a terminal state.
    fn on_member_terminal(
        &mut self,
        scope: ScopeId,
        member: TaskId,
        disposition: &Disposition,
        wakeups: &mut Wakeups,
    ) {
        let Some(record) = self.scope_mut(scope) else {
            return;
        };
        record.member_finished();

        if let Disposition::Failed(err) = disposition {
            let first = record.record_failure(err.clone());
            let action = record.policy.on_child_failure();
            if first {
                debug!(scope = %scope, task = %member, policy = %record.policy, "scope member failed");
            }
            // Only the first recorded failure drives propagation.
            if let (true, FailureAction::CancelSiblings(reason)) = (first, action) {
                if let Some(record) = self.scope_mut(scope) {
                    record.mark_cancelling(reason);
                }
                let members: Vec<TaskId> = self
                    .scope(scope)
                    .map(|s| s.tasks.clone())
                    .unwrap_or_default();
                for other in members {
                    if other != member {
                        self.request_cancel_task(other, reason, wakeups);
                    }
                }
                let children: Vec<ScopeId> = self
                    .scope(scope)
                    .map(|s| s.child_scopes.clone())
                    .unwrap_or_default();
                for child in children {
                    self.cancel_scope(child, reason, wakeups);
                }
            }
        }

        self.try_close_scope(scope, wakeups);
    }

    /// Closes a scope if it is flagged to close and fully quiesced, reaping
    /// member records and cascading to the parent and owner.
    fn try_close_scope(&mut self, scope: ScopeId, wakeups: &mut Wakeups) {
        let ready_to_close = self.scope(scope).is_some_and(|s| {
            !s.state.is_terminal() && s.close_on_quiesce && s.is_quiescent()
        });
        if !ready_to_close {
            return;
        }
        let Some(record) = self.scope_mut(scope) else {
            return;
        };
        record.mark_closed();
        let members = std::mem::take(&mut record.tasks);
        let parent = record.parent;
        let owner = record.owner_task;
        let failure = record.failure.clone();

        for member in members {
            self.tasks.remove(member.arena_index());
        }
        debug!(scope = %scope, failure = failure.is_some(), "scope closed");

        match parent {
            Some(parent) => {
                // Nested scope: the record is consumed here, handing its
                // failure to the owner, and the parent may cascade closed.
                self.scopes.remove(scope.arena_index());
                if let Some(p) = self.scope_mut(parent) {
                    p.remove_child_scope(scope);
                }
                if let Some(owner) = owner {
                    if let Some(task) = self.task_mut(owner) {
                        task.nested_scopes.retain(|&s| s != scope);
                        if task.nested_failure.is_none() {
                            task.nested_failure = failure;
                        }
                    }
                    self.advance_completing(owner, wakeups);
                }
                self.try_close_scope(parent, wakeups);
            }
            None => {
                // Root scope: the closed record stays behind so the scope
                // handle can collect the failure from `take_closed_root`.
                wakeups.notify = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Requests cancellation of one task, fanning out to its children and
    /// nested scopes. Idempotent.
    pub fn request_cancel_task(
        &mut self,
        task: TaskId,
        reason: CancelReason,
        wakeups: &mut Wakeups,
    ) {
        let Some(record) = self.task_mut(task) else {
            return;
        };
        match record.state {
            TaskState::New => {
                // Never started, never runs. Straight to terminal.
                record.cancel_reason = Some(reason);
                if let Some(hook) = record.on_cancel.take() {
                    wakeups.hooks.push(Box::new(move || hook(reason)));
                }
                trace!(task = %task, reason = %reason, "cancelled before start");
                self.finalize(task, Outcome::Cancelled(reason), wakeups);
            }
            TaskState::Active | TaskState::Completing => {
                let was_waiting = !matches!(record.wait, WaitState::Idle);
                let had_continuation = record.continuation.is_some();
                record.mark_cancelling(reason);
                record.wait = WaitState::Idle;
                if let Some(hook) = record.on_cancel.take() {
                    wakeups.hooks.push(Box::new(move || hook(reason)));
                }
                trace!(task = %task, reason = %reason, was_waiting, "cancellation requested");

                if had_continuation {
                    // Replace whatever was staged: a wakeup that raced with
                    // this cancel loses, and the task observes the cancel.
                    record.stage(ResumeInput::Cancelled(reason));
                    if was_waiting {
                        wakeups.ready.push(task);
                    }
                }
                // A running segment (continuation checked out) observes the
                // flag, or finish_step reroutes it when the segment ends.

                let children: Vec<TaskId> = self
                    .task(task)
                    .map(|r| r.children.clone())
                    .unwrap_or_default();
                let scopes: Vec<ScopeId> = self
                    .task(task)
                    .map(|r| r.nested_scopes.clone())
                    .unwrap_or_default();
                let child_reason = CancelReason::parent_cancelled();
                for child in children {
                    self.request_cancel_task(child, child_reason, wakeups);
                }
                for scope in scopes {
                    self.cancel_scope(scope, child_reason, wakeups);
                }
                // A body-finished task has nothing left to run; it
                // finalizes as soon as its children drain.
                self.advance_completing(task, wakeups);
            }
            TaskState::Cancelling | TaskState::Completed | TaskState::Cancelled => {
                trace!(task = %task, state = ?record.state, "cancel request ignored");
            }
        }
    }

    /// Cancels every member of a scope with the given reason, verbatim.
    ///
    /// The reason is forwarded untouched so a timeout cancelling a scope is
    /// distinguishable from an explicit cancel by everyone it reaches. The
    /// scope's owner task is not a member and is not cancelled; it observes
    /// the teardown through whatever it awaits.
    pub fn cancel_scope(&mut self, scope: ScopeId, reason: CancelReason, wakeups: &mut Wakeups) {
        let Some(record) = self.scope_mut(scope) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.mark_cancelling(reason);
        debug!(scope = %scope, reason = %reason, "scope cancelling");

        let members: Vec<TaskId> = self
            .scope(scope)
            .map(|s| s.tasks.clone())
            .unwrap_or_default();
        for member in members {
            self.request_cancel_task(member, reason, wakeups);
        }
        let children: Vec<ScopeId> = self
            .scope(scope)
            .map(|s| s.child_scopes.clone())
            .unwrap_or_default();
        for child in children {
            self.cancel_scope(child, reason, wakeups);
        }
        self.try_close_scope(scope, wakeups);
    }

    /// Cancels every root scope, for runtime shutdown.
    pub fn cancel_all_roots(&mut self, reason: CancelReason, wakeups: &mut Wakeups) {
        let roots = self.roots.clone();
        for root in roots {
            self.cancel_scope(root, reason, wakeups);
        }
    }

    // ------------------------------------------------------------------
    // External wakeups
    // ------------------------------------------------------------------

    /// Delivers a timer wakeup. Stale epochs are dropped: the task already
    /// resumed for another cause, or was cancelled.
    pub fn timer_fired(&mut self, task: TaskId, epoch: u64) -> Wakeups {
        let mut wakeups = Wakeups::default();
        let Some(record) = self.task_mut(task) else {
            return wakeups;
        };
        if record.clear_wait(epoch) {
            record.stage(ResumeInput::unit());
            wakeups.ready.push(task);
        } else {
            trace!(task = %task, epoch, "stale timer dropped");
        }
        wakeups
    }

    /// Arms the task's event slot and returns the token its completion
    /// handle must present. Supersedes any previously armed event.
    pub fn arm_event(&mut self, task: TaskId) -> Option<EventToken> {
        let record = self.task_mut(task)?;
        let seq = record.arm_event();
        Some(EventToken { task, seq })
    }

    /// Delivers an external completion to an armed event.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalResume`] when the event was already
    /// completed, the handle was superseded, or the task is gone. Exactly
    /// one fire per armed event can succeed.
    pub fn complete_event(
        &mut self,
        task: TaskId,
        seq: u64,
        input: ResumeInput,
    ) -> Result<Wakeups> {
        let mut wakeups = Wakeups::default();
        let Some(record) = self.task_mut(task) else {
            return Err(Error::illegal_resume("task already completed"));
        };
        if record.is_terminal() {
            return Err(Error::illegal_resume("task already completed"));
        }
        match record.event {
            EventSlot::Armed { seq: armed } if armed == seq => {
                if record.waiting_on_event() {
                    record.event = EventSlot::Consumed { seq };
                    record.stage(input);
                    record.wait = WaitState::Idle;
                    wakeups.ready.push(task);
                } else {
                    // Fired before the task reached its suspension point;
                    // park the input until it does.
                    record.event = EventSlot::Fired { seq, input };
                }
                Ok(wakeups)
            }
            EventSlot::Fired { seq: s, .. } | EventSlot::Consumed { seq: s } if s == seq => {
                Err(Error::illegal_resume("event completed twice"))
            }
            _ => Err(Error::illegal_resume("event handle superseded")),
        }
    }
}
