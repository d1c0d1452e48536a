//! Configuration for the lab runtime.
//!
//! The lab configuration controls deterministic execution:
//! - Random seed for scheduling decisions
//! - Whether the ready queue is shuffled between steps
//! - Step budget before a drain is declared stuck

use crate::util::DetRng;

/// Configuration for the lab runtime.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Random seed for deterministic scheduling.
    pub seed: u64,
    /// Whether to shuffle the ready queue before each step. Off, the lab
    /// runs tasks in strict FIFO submission order.
    pub shuffle_ready: bool,
    /// Maximum number of steps one drain may take before panicking.
    pub max_steps: Option<u64>,
}

impl LabConfig {
    /// Creates a new lab configuration with the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            shuffle_ready: false,
            max_steps: Some(100_000),
        }
    }

    /// Creates a lab configuration from the current time (for quick testing).
    #[must_use]
    pub fn from_time() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42);
        Self::new(seed)
    }

    /// Sets whether the ready queue is shuffled before each step.
    #[must_use]
    pub const fn shuffle_ready(mut self, value: bool) -> Self {
        self.shuffle_ready = value;
        self
    }

    /// Sets the maximum number of steps.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Disables the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Creates a deterministic RNG from this configuration.
    #[must_use]
    pub fn rng(&self) -> DetRng {
        DetRng::new(self.seed)
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new(42)
    }
}
