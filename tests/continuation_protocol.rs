//! Resume-protocol tests.
//!
//! A coroutine advances one segment per resume. Each resume carries exactly
//! one input: `Start` for the first segment, then a value, a failure, or a
//! cancellation matching whatever the previous segment suspended on. These
//! tests pin the protocol down from the outside: input sequencing, value
//! delivery from awaited tasks, external event completion, and the one-fire
//! rule for completion handles.

#[macro_use]
mod common;

use common::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weft::cx::Cx;
use weft::error::{Error, ErrorKind};
use weft::runtime::Completion;
use weft::step::{from_fn, Coroutine, ResumeInput, Step};
use weft::types::{ScopePolicy, TaskId};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

// ============================================================================
// Helper machines
// ============================================================================

/// Records the shape of every input it is resumed with, suspending once on
/// a yield and once on a timer along the way.
struct Recorder {
    log: Arc<Mutex<Vec<&'static str>>>,
    phase: u8,
}

impl Coroutine for Recorder {
    type Output = ();

    fn resume(&mut self, _cx: &Cx, input: ResumeInput) -> Step<()> {
        self.log.lock().unwrap().push(match &input {
            ResumeInput::Start => "start",
            ResumeInput::Value(_) => "value",
            ResumeInput::Failed(_) => "failed",
            ResumeInput::Cancelled(_) => "cancelled",
        });
        self.phase += 1;
        match self.phase {
            1 => Step::yield_now(),
            2 => Step::sleep(Duration::from_millis(10)),
            _ => Step::done(()),
        }
    }
}

/// Spawns a child, waits for it, and completes with the child's value plus
/// one. The child id doubles as the resume-point marker.
struct AddOne {
    child: Option<TaskId>,
}

impl Coroutine for AddOne {
    type Output = u32;

    fn resume(&mut self, cx: &Cx, input: ResumeInput) -> Step<u32> {
        if self.child.is_some() {
            return match input.into_value::<u32>() {
                Ok(value) => Step::done(value + 1),
                Err(err) => Step::fail(err),
            };
        }
        match cx.spawn(from_fn(|_cx, _input| Step::done(7_u32))) {
            Ok(handle) => {
                let id = handle.id();
                self.child = Some(id);
                Step::wait_for(id)
            }
            Err(err) => Step::fail(err),
        }
    }
}

// ============================================================================
// Test: Input Sequencing
// ============================================================================

#[test]
fn test_segments_receive_start_then_values() {
    init_test("test_segments_receive_start_then_values");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let log = Arc::new(Mutex::new(Vec::new()));

    let handle = scope
        .spawn(Recorder {
            log: Arc::clone(&log),
            phase: 0,
        })
        .unwrap();

    test_section!("drive_through_yield_and_timer");
    lab.run_until_quiescent();
    assert!(!handle.is_finished(), "still parked on the timer");
    lab.advance_time(Duration::from_millis(10));
    lab.run_until_quiescent();

    assert!(handle.is_finished());
    assert_with_log!(
        *log.lock().unwrap() == vec!["start", "value", "value"],
        "inputs arrive as start, then one value per wakeup",
        vec!["start", "value", "value"],
        log.lock().unwrap().clone()
    );
    test_complete!("test_segments_receive_start_then_values");
}

// ============================================================================
// Test: Awaited Task Results
// ============================================================================

#[test]
fn test_child_value_flows_into_the_waiter() {
    init_test("test_child_value_flows_into_the_waiter");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);

    let handle = scope.spawn(AddOne { child: None }).unwrap();
    lab.run_until_quiescent();

    assert_eq!(handle.await_result().unwrap(), 8);
    assert!(scope.join().is_ok());
    test_complete!("test_child_value_flows_into_the_waiter");
}

#[test]
fn test_failed_child_delivers_failed_input() {
    init_test("test_failed_child_delivers_failed_input");
    let mut lab = test_lab();
    // Supervisor policy: the parent must survive the child's failure to
    // observe it on its failure path.
    let scope = lab.scope(ScopePolicy::Supervisor);

    let mut child: Option<TaskId> = None;
    let handle = scope
        .spawn(from_fn(move |cx, input| {
            if child.is_some() {
                return match input {
                    ResumeInput::Failed(err) => {
                        // Recover with a fallback instead of propagating.
                        Step::done(format!("fallback after: {err}"))
                    }
                    other => Step::fail(Error::computation(format!(
                        "expected the child failure, got {other:?}"
                    ))),
                };
            }
            match cx.spawn(from_fn(|_cx, _input| {
                Step::<()>::fail(Error::computation("price feed stalled"))
            })) {
                Ok(spawned) => {
                    let id = spawned.id();
                    child = Some(id);
                    Step::wait_for(id)
                }
                Err(err) => Step::fail(err),
            }
        }))
        .unwrap();

    lab.run_until_quiescent();

    let recovered = handle.await_result().unwrap();
    assert!(
        recovered.contains("price feed stalled"),
        "the child's error text travels: {recovered}"
    );
    // The child is still a member of the scope, so its failure is recorded
    // there regardless of the parent's recovery.
    let err = scope.join().unwrap_err();
    assert_eq!(err.message(), Some("price feed stalled"));
    test_complete!("test_failed_child_delivers_failed_input");
}

// ============================================================================
// Test: External Events
// ============================================================================

#[test]
fn test_event_completion_resumes_with_payload() {
    init_test("test_event_completion_resumes_with_payload");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let slot: Arc<Mutex<Option<Completion<String>>>> = Arc::new(Mutex::new(None));

    let export = Arc::clone(&slot);
    let mut armed = false;
    let handle = scope
        .spawn(from_fn(move |cx, input| {
            if armed {
                return match input.into_value::<String>() {
                    Ok(s) => Step::done(s.len()),
                    Err(err) => Step::fail(err),
                };
            }
            armed = true;
            let (token, completion) = cx.event::<String>();
            *export.lock().unwrap() = Some(completion);
            Step::wait_event(token)
        }))
        .unwrap();

    lab.run_until_quiescent();
    assert!(!handle.is_finished(), "parked on the event");

    test_section!("fire_from_outside");
    let completion = slot.lock().unwrap().take().expect("completion exported");
    completion.complete("hello".to_string()).unwrap();
    lab.run_until_quiescent();

    assert_eq!(handle.await_result().unwrap(), 5);
    test_complete!("test_event_completion_resumes_with_payload");
}

#[test]
fn test_event_failure_delivers_failed_input() {
    init_test("test_event_failure_delivers_failed_input");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let slot: Arc<Mutex<Option<Completion<String>>>> = Arc::new(Mutex::new(None));

    let export = Arc::clone(&slot);
    let mut armed = false;
    let handle = scope
        .spawn(from_fn(move |cx, input| {
            if armed {
                return match input.into_value::<String>() {
                    Ok(s) => Step::done(s.len()),
                    Err(err) => Step::fail(err),
                };
            }
            armed = true;
            let (token, completion) = cx.event::<String>();
            *export.lock().unwrap() = Some(completion);
            Step::wait_event(token)
        }))
        .unwrap();

    lab.run_until_quiescent();
    let completion = slot.lock().unwrap().take().expect("completion exported");
    completion
        .fail(Error::computation("upstream closed"))
        .unwrap();
    lab.run_until_quiescent();

    let err = handle.await_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Computation);
    assert_eq!(err.message(), Some("upstream closed"));
    test_complete!("test_event_failure_delivers_failed_input");
}

#[test]
fn test_completion_after_task_finished_is_rejected() {
    init_test("test_completion_after_task_finished_is_rejected");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);
    let slot: Arc<Mutex<Option<Completion<u8>>>> = Arc::new(Mutex::new(None));

    // Arms an event but never waits on it; the completion handle outlives
    // the task.
    let export = Arc::clone(&slot);
    let handle = scope
        .spawn(from_fn(move |cx, _input| {
            let (_token, completion) = cx.event::<u8>();
            *export.lock().unwrap() = Some(completion);
            Step::done(())
        }))
        .unwrap();

    lab.run_until_quiescent();
    assert!(handle.is_finished());

    let completion = slot.lock().unwrap().take().expect("completion exported");
    let err = completion.complete(1).unwrap_err();
    assert_with_log!(
        err.kind() == ErrorKind::IllegalResume,
        "firing at a finished task is a protocol violation",
        ErrorKind::IllegalResume,
        err.kind()
    );
    test_complete!("test_completion_after_task_finished_is_rejected");
}

// ============================================================================
// Test: Result Taking
// ============================================================================

#[test]
fn test_result_is_single_take() {
    init_test("test_result_is_single_take");
    let mut lab = test_lab();
    let scope = lab.scope(ScopePolicy::FailFast);

    let mut yields = 2_u8;
    let handle = scope
        .spawn(from_fn(move |_cx, _input| {
            if yields > 0 {
                yields -= 1;
                return Step::yield_now();
            }
            Step::done(9_u32)
        }))
        .unwrap();

    assert_eq!(handle.try_result().unwrap(), None);
    lab.step();
    assert_eq!(handle.try_result().unwrap(), None, "still mid-flight");
    lab.run_until_quiescent();

    assert_eq!(handle.try_result().unwrap(), Some(9));
    let err = handle.try_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResultTaken);
    test_complete!("test_result_is_single_take");
}
