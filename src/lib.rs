//! Weft: explicit-continuation task runtime with structured concurrency.
//!
//! # Overview
//!
//! Weft runs cooperative tasks written as explicit state machines. A task
//! implements [`Coroutine`]: each call to `resume` executes one segment and
//! either completes or names the one thing it waits on next. There is no
//! hidden stack and no poll loop; suspension points are plain data.
//!
//! Every task belongs to a scope. Scopes own their members, convert member
//! failure into cancellation by policy, and do not close until every member
//! has settled, so no task outlives the code that spawned it.
//!
//! # Core Guarantees
//!
//! - **No orphan tasks**: every spawn names an owning scope, and a scope joins all its members
//! - **Cancellation is a verdict, not an error**: a cancelled member settles as cancelled and never marks its scope failed
//! - **One resume at a time**: the runtime never resumes a task concurrently with itself
//! - **User code runs unlocked**: continuations execute outside the state mutex
//! - **Deterministic testing**: the lab runtime replays schedules from a seed under virtual time
//!
//! # Module Structure
//!
//! - [`step`]: the coroutine protocol (resume inputs, suspension, completion)
//! - [`cx`]: capability context, spawn options, scope handles
//! - [`runtime`]: state tables, dispatchers, timers, and the runtime builder
//! - [`combinator`]: coroutines that wrap coroutines (timeouts)
//! - [`lab`]: deterministic runtime for tests
//! - [`types`]: identifiers, outcomes, cancellation reasons, policies
//! - [`record`]: task and scope bookkeeping
//! - [`error`]: error type and kinds
//! - [`tracing_compat`]: optional tracing integration
//! - [`util`]: arena storage and the deterministic RNG

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod combinator;
pub mod cx;
pub mod error;
pub mod lab;
pub mod record;
pub mod runtime;
pub mod step;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use combinator::{timeout, timeout_or_none, Timeout, TimeoutOrNone};
pub use cx::{Cx, ScopeHandle, SpawnOptions, StartMode};
pub use error::{Error, ErrorKind, Result};
pub use lab::{LabConfig, LabRuntime};
pub use record::TaskState;
pub use runtime::{
    BuildError, ClockTimer, Completion, Dispatcher, InlineDispatcher, JoinHandle, Runtime,
    RuntimeBuilder, RuntimeConfig, ThreadDispatcher, TimerService,
};
pub use step::{from_fn, Coroutine, EventToken, ResumeInput, Sleep, Step, Wait, YieldNow};
pub use types::{
    CancelKind, CancelReason, Disposition, Outcome, Payload, ScopeId, ScopePolicy, TaskId,
    TaskReport, Time,
};
