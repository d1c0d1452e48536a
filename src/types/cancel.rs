//! Cancellation reason and kind types.
//!
//! A cancelled task carries structured metadata about who asked for the
//! cancellation and why. The reason travels with the cancel request through
//! the task tree, shows up in the terminal [`Disposition`], and is delivered
//! to the computation at its next suspend point.
//!
//! [`Disposition`]: super::Disposition

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested through a handle.
    Explicit,
    /// A sibling task failed and the owning scope is fail-fast.
    SiblingFailed,
    /// The parent task was cancelled or failed and is tearing down its
    /// children.
    ParentCancelled,
    /// A timeout elapsed.
    Timeout,
    /// The owning scope is being cancelled as a whole (`cancel_all`).
    ScopeTeardown,
    /// The runtime is shutting down.
    Shutdown,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::SiblingFailed => write!(f, "sibling failed"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
            Self::Timeout => write!(f, "timeout"),
            Self::ScopeTeardown => write!(f, "scope teardown"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Why a task was cancelled: the kind plus optional static context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelReason {
    kind: CancelKind,
    detail: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no detail.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self { kind, detail: None }
    }

    /// Creates an explicit cancellation reason with context.
    #[must_use]
    pub const fn explicit(detail: &'static str) -> Self {
        Self {
            kind: CancelKind::Explicit,
            detail: Some(detail),
        }
    }

    /// Creates a sibling-failure cancellation reason.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::SiblingFailed)
    }

    /// Creates a parent-cancelled cancellation reason.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Creates a scope-teardown cancellation reason.
    #[must_use]
    pub const fn scope_teardown() -> Self {
        Self::new(CancelKind::ScopeTeardown)
    }

    /// Creates a shutdown cancellation reason.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Attaches static context to this reason.
    #[must_use]
    pub const fn with_detail(mut self, detail: &'static str) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Returns the kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the optional context string.
    #[must_use]
    pub const fn detail(&self) -> Option<&'static str> {
        self.detail
    }

    /// Returns true if this reason came from a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, CancelKind::Timeout)
    }

    /// Returns true if this reason came from runtime shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::Explicit)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(detail) = self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}
