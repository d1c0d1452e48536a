//! Coroutine combinators.
//!
//! Combinators wrap a coroutine in another coroutine, adding behavior
//! without touching the inner machine. They compose: a combinator's output
//! is itself a [`Coroutine`](crate::step::Coroutine) and can be wrapped
//! again or spawned like any other.
//!
//! - [`timeout`]: fail the computation if a deadline elapses first.
//! - [`timeout_or_none`]: same race, absorbing the deadline into `None`.

mod timeout;

pub use timeout::{timeout, timeout_or_none, Timeout, TimeoutOrNone};
