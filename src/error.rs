//! Error types and error handling strategy.
//!
//! This module defines the core error type used throughout the runtime.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Cancellation is not an error: a cancelled task terminates with a
//!   [`Disposition::Cancelled`] outcome, and [`ErrorKind::Cancelled`] exists
//!   only at join boundaries ("the task you awaited was cancelled")
//! - Panics in user segments are caught at the worker boundary and converted
//!   to computation failures via [`Error::from_panic`]
//!
//! [`Disposition::Cancelled`]: crate::types::Disposition::Cancelled

use crate::types::CancelReason;
use core::fmt;
use std::sync::Arc;

/// A convenient result alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resume was delivered to a continuation that is not suspended, or was
    /// delivered twice for the same suspension.
    IllegalResume,
    /// A failure raised by user computation.
    Computation,
    /// An awaited task was cancelled (join-boundary signal; see module docs).
    Cancelled,
    /// A deadline elapsed before the wrapped operation finished.
    Timeout,
    /// The target scope is closed or being cancelled; no new work is admitted.
    ScopeClosed,
    /// The task identifier did not resolve (already reaped, or stale).
    UnknownTask,
    /// The task's result payload was already consumed.
    ResultTaken,
    /// The runtime is shutting down.
    Shutdown,
}

impl ErrorKind {
    /// Returns a short human-readable name for the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IllegalResume => "illegal resume",
            Self::Computation => "computation failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timed out",
            Self::ScopeClosed => "scope closed",
            Self::UnknownTask => "unknown task",
            Self::ResultTaken => "result already taken",
            Self::Shutdown => "runtime shutting down",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type for runtime operations.
///
/// Cloneable so a single failure can fan out to every waiter of the failed
/// task; the optional source is shared behind an `Arc` for the same reason.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    cancel: Option<CancelReason>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            cancel: None,
        }
    }

    /// Creates a computation failure with a description.
    #[must_use]
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Computation).with_message(msg)
    }

    /// Creates an illegal-resume error with a description of the misuse.
    #[must_use]
    pub fn illegal_resume(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalResume).with_message(msg)
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout).with_message(msg)
    }

    /// Creates a scope-closed error.
    #[must_use]
    pub fn scope_closed() -> Self {
        Self::new(ErrorKind::ScopeClosed)
    }

    /// Creates an unknown-task error.
    #[must_use]
    pub fn unknown_task() -> Self {
        Self::new(ErrorKind::UnknownTask)
    }

    /// Creates a result-taken error.
    #[must_use]
    pub fn result_taken() -> Self {
        Self::new(ErrorKind::ResultTaken)
    }

    /// Creates a shutdown error.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown)
    }

    /// Creates the join-boundary signal for an awaited task that was
    /// cancelled. Carries the structured reason.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: None,
            source: None,
            cancel: Some(reason),
        }
    }

    /// Converts a caught panic payload into a computation failure.
    ///
    /// Extracts `&str` and `String` payloads; anything else is reported
    /// opaquely.
    #[must_use]
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panic: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panic: {s}")
        } else {
            "panic: <non-string payload>".to_string()
        };
        Self::computation(msg)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the structured cancel reason if this is a join-boundary
    /// cancellation signal.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel
    }

    /// Returns true if this is the join-boundary cancellation signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if this error reports a resume-protocol violation.
    #[must_use]
    pub const fn is_illegal_resume(&self) -> bool {
        matches!(self.kind, ErrorKind::IllegalResume)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(reason) = &self.cancel {
            write!(f, " ({reason})")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}
