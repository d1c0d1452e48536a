//! Runtime configuration.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"weft-worker"` |
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables** — values from `WEFT_*` vars, applied through
//!    [`apply_env_overrides`] or [`RuntimeBuilder::from_env`]
//! 3. **Defaults** — built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `WEFT_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `WEFT_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `WEFT_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//!
//! [`RuntimeBuilder::from_env`]: super::builder::RuntimeBuilder::from_env

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "WEFT_WORKER_THREADS";
/// Environment variable name for worker thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "WEFT_THREAD_STACK_SIZE";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "WEFT_THREAD_NAME_PREFIX";

const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_NAME_PREFIX: &str = "weft-worker";

/// Errors that can occur while assembling a runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// An environment variable was set but its value does not parse.
    #[error("invalid value for {var}: expected unsigned integer, got {value:?}")]
    InvalidEnv {
        /// The variable that failed to parse.
        var: &'static str,
        /// The offending value.
        value: String,
    },
    /// The operating system refused to spawn a runtime thread.
    #[error("failed to spawn {name}: {reason}")]
    ThreadSpawn {
        /// Name of the thread that could not be spawned.
        name: String,
        /// Operating system error text.
        reason: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread in bytes (default: 2 MiB).
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_NAME_PREFIX.to_string();
        }
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
///
/// # Errors
///
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, BuildError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| BuildError::InvalidEnv {
            var,
            value: val.to_string(),
        })
}
