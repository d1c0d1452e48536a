//! Core identifier and outcome types shared across the runtime.
//!
//! Everything in here is plain data: ids that name tasks and scopes, the
//! virtual clock's [`Time`], cancellation reasons, task outcomes, and the
//! scope failure policies. The state machines in [`crate::runtime`] operate
//! on these; nothing here holds locks or talks to threads.

pub mod cancel;
pub mod id;
pub mod outcome;
pub mod policy;

pub use cancel::{CancelKind, CancelReason};
pub use id::{ScopeId, TaskId, Time};
pub use outcome::{Disposition, Outcome, Payload, TaskReport};
pub use policy::{FailureAction, ScopePolicy};
