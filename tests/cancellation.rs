//! Cancellation protocol tests.
//!
//! Cancellation is a request, not an interruption: a running segment is
//! never stopped mid-flight, but the next resume delivers the verdict. The
//! rules under test:
//!
//! - A task cancelled before its first segment never runs at all.
//! - Cancellation is sticky and idempotent.
//! - A suspended task wakes promptly with the cancellation input; its timer
//!   firing later is dropped as stale.
//! - Cancelling a parent tears down the tasks it spawned.

#[macro_use]
mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weft::cx::SpawnOptions;
use weft::step::{from_fn, Sleep, Step};
use weft::types::{CancelKind, CancelReason, ScopePolicy, TaskId};
use weft::TaskState;

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

// ============================================================================
// Test: Cancel Before First Segment
// ============================================================================

#[test]
fn test_cancel_before_first_segment_skips_the_body() {
    init_test("test_cancel_before_first_segment_skips_the_body");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let ran = Arc::new(AtomicBool::new(false));

    let tracker = Arc::clone(&ran);
    let handle = scope
        .spawn(from_fn(move |_cx, _input| {
            tracker.store(true, Ordering::SeqCst);
            Step::done(())
        }))
        .unwrap();

    test_section!("cancel_before_stepping");
    handle.cancel();
    lab.run_until_quiescent();

    assert!(!ran.load(Ordering::SeqCst), "body must never run");
    assert!(handle
        .report()
        .is_some_and(|r| r.disposition.is_cancelled()));
    test_complete!("test_cancel_before_first_segment_skips_the_body");
}

// ============================================================================
// Test: Idempotence
// ============================================================================

#[test]
fn test_cancel_is_idempotent() {
    init_test("test_cancel_is_idempotent");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let cancel_hooks = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&cancel_hooks);
    let handle = scope
        .spawn_with(
            SpawnOptions::new().on_cancel(move |_reason| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Sleep::new(Duration::from_secs(60)),
        )
        .unwrap();

    lab.run_until_quiescent();

    test_section!("repeat_cancellation");
    handle.cancel();
    handle.cancel();
    lab.run_until_quiescent();
    handle.cancel();
    lab.run_until_quiescent();

    assert_with_log!(
        cancel_hooks.load(Ordering::SeqCst) == 1,
        "exactly one cancellation is delivered",
        1,
        cancel_hooks.load(Ordering::SeqCst)
    );
    let err = handle.await_result().unwrap_err();
    assert!(err.is_cancelled());
    test_complete!("test_cancel_is_idempotent");
}

#[test]
fn test_cancelling_a_finished_task_is_a_no_op() {
    init_test("test_cancelling_a_finished_task_is_a_no_op");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let handle = scope
        .spawn(from_fn(|_cx, _input| Step::done(11_u32)))
        .unwrap();

    lab.run_until_quiescent();
    assert!(handle.is_finished());

    handle.cancel();
    lab.run_until_quiescent();

    assert!(handle.report().is_some_and(|r| r.disposition.is_completed()));
    assert_eq!(handle.await_result().unwrap(), 11);
    test_complete!("test_cancelling_a_finished_task_is_a_no_op");
}

// ============================================================================
// Test: Cancellation Of A Suspended Task
// ============================================================================

#[test]
fn test_suspended_task_wakes_with_the_cancellation() {
    init_test("test_suspended_task_wakes_with_the_cancellation");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let observed = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&observed);
    let mut sleeping = false;
    let handle = scope
        .spawn(from_fn(move |cx, input| {
            if !sleeping {
                sleeping = true;
                return Step::sleep(Duration::from_secs(60));
            }
            // The wakeup carries the verdict and the context flag agrees.
            *sink.lock().unwrap() = Some((input.is_cancelled(), cx.is_cancelled()));
            Step::Complete(input.acknowledge())
        }))
        .unwrap();

    lab.run_until_quiescent();
    assert_eq!(lab.pending_timers(), 1);

    test_section!("cancel_without_advancing_time");
    handle.cancel();
    lab.run_until_quiescent();

    let (input_cancelled, flag_cancelled) =
        observed.lock().unwrap().take().expect("segment observed the wakeup");
    assert!(input_cancelled, "resume input is the cancellation");
    assert!(flag_cancelled, "context flag is set during the segment");
    assert!(handle
        .report()
        .is_some_and(|r| r.disposition.is_cancelled()));

    test_section!("late_timer_is_stale");
    lab.advance_time(Duration::from_secs(60));
    let extra = lab.run_until_quiescent();
    assert_eq!(extra, 0, "stale timer must not resume anything");
    test_complete!("test_suspended_task_wakes_with_the_cancellation");
}

#[test]
fn test_cancel_reason_reaches_the_waiter() {
    init_test("test_cancel_reason_reaches_the_waiter");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let handle = scope.spawn(Sleep::new(Duration::from_secs(60))).unwrap();

    lab.run_until_quiescent();
    handle.cancel_with_reason(CancelReason::explicit("quota exhausted"));
    lab.run_until_quiescent();

    let err = handle.await_result().unwrap_err();
    assert!(err.is_cancelled());
    let reason = err.cancel_reason().expect("structured reason travels");
    assert_eq!(reason.kind(), CancelKind::Explicit);
    assert_eq!(reason.detail(), Some("quota exhausted"));
    test_complete!("test_cancel_reason_reaches_the_waiter");
}

// ============================================================================
// Test: Parent Teardown
// ============================================================================

#[test]
fn test_parent_cancellation_fans_out_to_children() {
    init_test("test_parent_cancellation_fans_out_to_children");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let child_id: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));
    let child_reason: Arc<Mutex<Option<CancelReason>>> = Arc::new(Mutex::new(None));

    let id_slot = Arc::clone(&child_id);
    let reason_slot = Arc::clone(&child_reason);
    let mut child: Option<TaskId> = None;
    let parent = scope
        .spawn(from_fn(move |cx, input| {
            if child.is_some() {
                // Woken for the child's outcome or for our own cancellation.
                return Step::Complete(input.acknowledge());
            }
            let reason_sink = Arc::clone(&reason_slot);
            let spawned = match cx.spawn_with(
                SpawnOptions::new().on_cancel(move |reason| {
                    *reason_sink.lock().unwrap() = Some(reason);
                }),
                Sleep::new(Duration::from_secs(60)),
            ) {
                Ok(handle) => handle.id(),
                Err(err) => return Step::fail(err),
            };
            child = Some(spawned);
            *id_slot.lock().unwrap() = Some(spawned);
            Step::wait_for(spawned)
        }))
        .unwrap();

    lab.run_until_quiescent();
    let child = child_id.lock().unwrap().expect("child spawned");
    assert_eq!(lab.task_state(child), Some(TaskState::Active));

    test_section!("cancel_the_parent");
    parent.cancel();
    lab.run_until_quiescent();

    assert!(parent
        .report()
        .is_some_and(|r| r.disposition.is_cancelled()));
    let reason = child_reason.lock().unwrap().expect("child cancelled too");
    assert_eq!(reason.kind(), CancelKind::ParentCancelled);
    assert_eq!(lab.task_state(child), Some(TaskState::Cancelled));
    assert!(scope.join().is_ok(), "teardown is not a failure");
    test_complete!("test_parent_cancellation_fans_out_to_children");
}
