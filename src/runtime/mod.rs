//! Runtime state and scheduling.
//!
//! This module contains the core runtime machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and the threaded [`Runtime`]
//! - [`state`]: Task and scope tables, plus every lifecycle transition
//! - [`dispatch`]: Ready queue shared by the worker threads
//! - [`handle`]: Join handles and external completion handles
//! - [`timer`]: Clock thread arming timed suspensions
//!
//! # Quick Start
//!
//! ```ignore
//! use weft::{RuntimeBuilder, ScopePolicy};
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let scope = runtime.scope(ScopePolicy::FailFast);
//! let handle = scope.spawn(my_machine)?;
//! let value: u64 = handle.await_result()?;
//! scope.join()?;
//! runtime.shutdown();
//! ```
//!
//! # Locking Discipline
//!
//! All lifecycle transitions happen inside [`state::RuntimeState`] under one
//! mutex. Transitions never run user code or touch the dispatcher while the
//! lock is held; they return [`state::Wakeups`] that the caller applies
//! after unlocking. Every path that resumes, cancels, or completes a task
//! follows that lock-transition-unlock-apply shape.

pub mod builder;
pub mod config;
pub mod dispatch;
pub(crate) mod exec;
pub mod handle;
pub mod state;
pub mod timer;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{apply_env_overrides, BuildError, RuntimeConfig};
pub use dispatch::{Dispatcher, InlineDispatcher, ThreadDispatcher};
pub use handle::{Completion, JoinHandle};
pub use state::Wakeups;
pub use timer::{ClockTimer, TimerCallback, TimerService};

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// State shared by every handle, worker, and timer callback of one runtime.
///
/// The mutex-guarded tables are the single source of truth. The condvar is
/// signalled whenever a transition sets [`Wakeups::notify`], waking joiners
/// blocked on a task or scope becoming terminal.
pub(crate) struct RuntimeShared {
    /// Task and scope tables.
    pub(crate) state: Mutex<state::RuntimeState>,
    /// Signalled on terminal transitions.
    pub(crate) joiners: Condvar,
    /// Where ready tasks are submitted.
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    /// Where suspension deadlines are armed.
    pub(crate) timer: Arc<dyn TimerService>,
}
