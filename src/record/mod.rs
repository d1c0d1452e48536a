//! Internal records for runtime entities.
//!
//! Per-task and per-scope bookkeeping lives here. These types are owned by
//! the runtime state table and mutated only under its lock; they are not
//! part of the public API.

pub mod scope;
pub mod task;

pub use scope::{ScopeRecord, ScopeState};
pub use task::{EventSlot, TaskRecord, TaskState, WaitKind, WaitState};
