//! Segment execution: checking out, resuming, and applying the result.
//!
//! This is the only place user code runs. A segment is resumed outside the
//! state lock, behind a panic boundary; everything it caused (suspension,
//! completion, panic) is applied back through
//! [`RuntimeState::finish_step`] and the resulting [`Wakeups`] performed.
//!
//! [`RuntimeState::finish_step`]: crate::runtime::state::RuntimeState::finish_step
//! [`Wakeups`]: crate::runtime::state::Wakeups

use crate::cx::Cx;
use crate::error::Error;
use crate::runtime::state::Wakeups;
use crate::runtime::RuntimeShared;
use crate::step::ErasedStep;
use crate::tracing_compat::debug;
use crate::types::TaskId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runs one segment of `task`, if it has one to run.
///
/// Stale queue entries (task finished, cancelled before start, or already
/// running elsewhere) are dropped silently.
pub(crate) fn run_ready(shared: &Arc<RuntimeShared>, task: TaskId) {
    let grant = {
        let mut state = shared.state.lock();
        state.begin_step(task)
    };
    let Some(grant) = grant else {
        return;
    };

    let cx = Cx::new(
        Arc::clone(shared),
        grant.task,
        grant.scope,
        grant.cancel_flag,
    );
    let mut continuation = grant.continuation;
    let input = grant.input;
    let resumed = panic::catch_unwind(AssertUnwindSafe(|| {
        continuation.resume_erased(&cx, input)
    }));

    // A panic poisons the machine: it is not handed back, and the task
    // settles as a computation failure.
    let (step, put_back) = match resumed {
        Ok(step) => (step, Some(continuation)),
        Err(payload) => {
            debug!(task = %task, "segment panicked");
            (ErasedStep::Complete(Err(Error::from_panic(payload))), None)
        }
    };

    let wakeups = {
        let mut state = shared.state.lock();
        state.finish_step(task, step, put_back)
    };
    perform(shared, wakeups);
}

/// Applies deferred effects outside the state lock: lifecycle hooks, timer
/// arming, dispatcher submission, and joiner wakeup.
pub(crate) fn perform(shared: &Arc<RuntimeShared>, wakeups: Wakeups) {
    let Wakeups {
        ready,
        timers,
        hooks,
        notify,
    } = wakeups;

    for hook in hooks {
        hook();
    }
    for request in timers {
        let weak = Arc::downgrade(shared);
        shared.timer.after(
            request.after,
            Box::new(move || {
                // The runtime may be gone by the time the clock fires.
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let wakeups = {
                    let mut state = shared.state.lock();
                    state.timer_fired(request.task, request.epoch)
                };
                perform(&shared, wakeups);
            }),
        );
    }
    for task in ready {
        shared.dispatcher.submit(task);
    }
    if notify {
        shared.joiners.notify_all();
    }
}
