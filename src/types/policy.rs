//! Failure-propagation policies for scopes.
//!
//! A scope consults its policy exactly once per child failure: should the
//! remaining siblings be cancelled, or should they run to their own natural
//! completion? Either way the scope records the first failure and surfaces it
//! to its owner once the whole child set is terminal.

use crate::types::CancelReason;
use core::fmt;

/// How a scope reacts when one of its children fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePolicy {
    /// The first child failure cancels every other non-terminal member of
    /// the scope. The default.
    #[default]
    FailFast,
    /// A child failure is recorded but siblings keep running; the first
    /// recorded failure is still surfaced to the owner after quiescence.
    Supervisor,
}

/// What the propagation algorithm should do about a child failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Record the failure and leave the siblings alone.
    Record,
    /// Record the failure and cancel the remaining members.
    CancelSiblings(CancelReason),
}

impl ScopePolicy {
    /// Decides the reaction to a child failure under this policy.
    #[must_use]
    pub fn on_child_failure(self) -> FailureAction {
        match self {
            Self::FailFast => FailureAction::CancelSiblings(CancelReason::sibling_failed()),
            Self::Supervisor => FailureAction::Record,
        }
    }

    /// Returns true if this policy cancels siblings on failure.
    #[must_use]
    pub const fn cancels_siblings(self) -> bool {
        matches!(self, Self::FailFast)
    }
}

impl fmt::Display for ScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail-fast"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}
