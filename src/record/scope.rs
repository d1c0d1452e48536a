//! Scope record: one node in the structured-concurrency tree.
//!
//! A scope owns tasks and child scopes. No task outlives its scope: the
//! scope closes only when every member is terminal, and closing reaps the
//! member records. A failure in one member is recorded here and, under the
//! fail-fast policy, fans out as cancellation to the other members.

use crate::error::Error;
use crate::types::{CancelReason, ScopeId, ScopePolicy, TaskId};

/// Lifecycle state of a scope.
///
/// ```text
/// Open ──► Cancelling ──► Closed
///   │                       ▲
///   └───────────────────────┘ (quiesced without cancellation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Accepting spawns; members running.
    Open,
    /// Cancellation issued to members; spawns are rejected, waiting for
    /// members to reach terminal states.
    Cancelling,
    /// Terminal. All members were terminal and have been reaped.
    Closed,
}

impl ScopeState {
    /// True once the scope has closed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// True if the scope accepts new members.
    #[must_use]
    pub const fn can_spawn(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Internal record for one scope.
#[derive(Debug)]
pub struct ScopeRecord {
    /// This scope's id.
    pub id: ScopeId,
    /// Enclosing scope (`None` for a root scope).
    pub parent: Option<ScopeId>,
    /// Task whose segment opened this scope, for nested scopes.
    pub owner_task: Option<TaskId>,
    /// Lifecycle state.
    pub state: ScopeState,
    /// How member failures propagate.
    pub policy: ScopePolicy,
    /// Every task ever admitted. Records are reaped when the scope closes,
    /// so terminal members stay resolvable for late awaiters until then.
    pub tasks: Vec<TaskId>,
    /// Members not yet terminal.
    pub live_tasks: usize,
    /// Open child scopes.
    pub child_scopes: Vec<ScopeId>,
    /// First member failure, if any. Surfaced to the owner at close.
    pub failure: Option<Error>,
    /// Why the scope was cancelled, if it was.
    pub cancel_reason: Option<CancelReason>,
    /// Whether the scope should close as soon as all members are terminal.
    /// Root scopes set this when joined; nested scopes when their owner's
    /// body finishes.
    pub close_on_quiesce: bool,
}

impl ScopeRecord {
    /// Creates an open scope record.
    #[must_use]
    pub fn new(
        id: ScopeId,
        parent: Option<ScopeId>,
        owner_task: Option<TaskId>,
        policy: ScopePolicy,
    ) -> Self {
        Self {
            id,
            parent,
            owner_task,
            state: ScopeState::Open,
            policy,
            tasks: Vec::new(),
            live_tasks: 0,
            child_scopes: Vec::new(),
            failure: None,
            cancel_reason: None,
            close_on_quiesce: false,
        }
    }

    /// Admits a task as a member.
    pub fn add_task(&mut self, task: TaskId) {
        self.tasks.push(task);
        self.live_tasks += 1;
    }

    /// Notes that a member reached a terminal state.
    pub fn member_finished(&mut self) {
        self.live_tasks = self.live_tasks.saturating_sub(1);
    }

    /// Registers an open child scope.
    pub fn add_child_scope(&mut self, child: ScopeId) {
        if !self.child_scopes.contains(&child) {
            self.child_scopes.push(child);
        }
    }

    /// Removes a child scope once it has closed.
    pub fn remove_child_scope(&mut self, child: ScopeId) {
        self.child_scopes.retain(|&c| c != child);
    }

    /// True when every member and child scope is done.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.live_tasks == 0 && self.child_scopes.is_empty()
    }

    /// Records the first failure; later failures are dropped.
    ///
    /// Returns true if this was the first.
    pub fn record_failure(&mut self, err: Error) -> bool {
        if self.failure.is_none() {
            self.failure = Some(err);
            true
        } else {
            false
        }
    }

    /// Moves `Open` into `Cancelling`, keeping the first reason.
    ///
    /// Returns false when already cancelling or closed.
    pub fn mark_cancelling(&mut self, reason: CancelReason) -> bool {
        if self.state == ScopeState::Open {
            self.state = ScopeState::Cancelling;
            self.cancel_reason = Some(reason);
            self.close_on_quiesce = true;
            true
        } else {
            false
        }
    }

    /// Moves into `Closed`.
    ///
    /// Returns false if already closed.
    pub fn mark_closed(&mut self) -> bool {
        if self.state == ScopeState::Closed {
            false
        } else {
            self.state = ScopeState::Closed;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ArenaIndex;

    fn scope() -> ScopeRecord {
        ScopeRecord::new(
            ScopeId::from_arena(ArenaIndex::new(0, 0)),
            None,
            None,
            ScopePolicy::FailFast,
        )
    }

    #[test]
    fn spawn_permission_follows_state() {
        assert!(ScopeState::Open.can_spawn());
        assert!(!ScopeState::Cancelling.can_spawn());
        assert!(!ScopeState::Closed.can_spawn());
    }

    #[test]
    fn quiescence_tracks_live_members() {
        let mut s = scope();
        assert!(s.is_quiescent());

        s.add_task(TaskId::new_for_test(0, 0));
        s.add_task(TaskId::new_for_test(1, 0));
        assert!(!s.is_quiescent());

        s.member_finished();
        assert!(!s.is_quiescent());
        s.member_finished();
        assert!(s.is_quiescent());

        // Terminal members stay listed until the scope reaps them.
        assert_eq!(s.tasks.len(), 2);
    }

    #[test]
    fn child_scopes_block_quiescence() {
        let mut s = scope();
        let child = ScopeId::from_arena(ArenaIndex::new(1, 0));
        s.add_child_scope(child);
        s.add_child_scope(child);
        assert_eq!(s.child_scopes.len(), 1);
        assert!(!s.is_quiescent());

        s.remove_child_scope(child);
        assert!(s.is_quiescent());
    }

    #[test]
    fn first_failure_wins() {
        let mut s = scope();
        assert!(s.record_failure(Error::computation("first")));
        assert!(!s.record_failure(Error::computation("second")));
        assert_eq!(
            s.failure.as_ref().and_then(Error::message),
            Some("first")
        );
    }

    #[test]
    fn cancelling_is_one_way_and_idempotent() {
        let mut s = scope();
        assert!(s.mark_cancelling(CancelReason::timeout()));
        assert!(s.close_on_quiesce);
        assert!(!s.mark_cancelling(CancelReason::explicit("again")));
        assert_eq!(
            s.cancel_reason.map(|r| r.kind()),
            Some(crate::types::CancelKind::Timeout)
        );

        assert!(s.mark_closed());
        assert!(!s.mark_closed());
        assert!(s.state.is_terminal());
    }
}
