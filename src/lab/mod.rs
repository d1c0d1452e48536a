//! Deterministic testing facilities.
//!
//! The lab runs the real runtime tables under a driver the test owns:
//! an inline ready queue stepped by hand and a virtual clock that only
//! moves when told to. Schedules derive from a seed, so a failure found
//! at seed N reproduces at seed N.
//!
//! Entry points are [`LabRuntime`] for execution and [`LabConfig`] for
//! seeds, shuffling, and step budgets.

mod clock;
pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::LabRuntime;
