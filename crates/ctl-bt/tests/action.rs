use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ctl_bt::{ActionNode, ActionWork, BtNode, Status, TickContext};
use ctl_core::{StatusCell, WorkError, WorkGate, Worker};

/// Tick `node` every 10ms until it leaves `Running` or `limit` passes.
fn tick_until_resolved(node: &mut dyn BtNode, limit: Duration) -> Status {
    let deadline = Instant::now() + limit;
    loop {
        let status = node.tick(&mut TickContext::new(0));
        if status != Status::Running || Instant::now() >= deadline {
            return status;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn action_succeeds_once_completion_holds() {
    let counter = Arc::new(AtomicI64::new(0));
    let step_counter = counter.clone();
    let check_counter = counter.clone();
    let work = ActionWork::new(move || {
        step_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Status::Running)
    })
    .with_completion(move || Ok(check_counter.load(Ordering::SeqCst) >= 3))
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2));

    let mut node = ActionNode::new("ramp", work);
    node.setup().unwrap();

    assert_eq!(tick_until_resolved(&mut node, Duration::from_secs(3)), Status::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(node.state().message, "Action complete");
    node.shutdown();
}

#[test]
fn update_never_blocks_on_the_worker() {
    let work = ActionWork::new(|| {
        thread::sleep(Duration::from_millis(200));
        Ok(Status::Running)
    })
    .with_timeout(Duration::from_millis(300));
    let mut node = ActionNode::new("slow", work);
    node.setup().unwrap();

    let started = Instant::now();
    assert_eq!(node.tick(&mut TickContext::new(0)), Status::Running);
    assert_eq!(node.tick(&mut TickContext::new(1)), Status::Running);
    assert!(started.elapsed() < Duration::from_millis(100));
    node.shutdown();
}

#[test]
fn cycle_times_out_to_failure() {
    let work = ActionWork::new(|| Ok(Status::Running))
        .with_completion(|| Ok(false))
        .with_loop_period(Duration::from_millis(20))
        .with_timeout(Duration::from_secs(2));
    let mut node = ActionNode::new("never_done", work);
    node.setup().unwrap();

    let started = Instant::now();
    let status = tick_until_resolved(&mut node, Duration::from_secs(5));
    let elapsed = started.elapsed();

    assert_eq!(status, Status::Failure);
    assert!(elapsed >= Duration::from_millis(1900), "resolved too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3000), "resolved too late: {elapsed:?}");
    node.shutdown();
}

#[test]
fn step_error_fails_the_cycle_but_not_the_worker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let (step_calls, step_done, check_done) = (calls.clone(), done.clone(), done.clone());
    let work = ActionWork::new(move || {
        if step_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(WorkError::failed("device unreachable"));
        }
        step_done.store(true, Ordering::SeqCst);
        Ok(Status::Running)
    })
    .with_completion(move || Ok(check_done.load(Ordering::SeqCst)))
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2));

    let mut node = ActionNode::new("flaky", work);
    node.setup().unwrap();

    assert_eq!(tick_until_resolved(&mut node, Duration::from_secs(3)), Status::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Next tick starts a fresh attempt on the same worker.
    assert_eq!(tick_until_resolved(&mut node, Duration::from_secs(3)), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    node.shutdown();
}

#[test]
fn final_check_overrules_a_step_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let (step_calls, step_done, check_done) = (calls.clone(), done.clone(), done.clone());
    // The write lands, then the driver reports an error anyway.
    let work = ActionWork::new(move || {
        step_calls.fetch_add(1, Ordering::SeqCst);
        step_done.store(true, Ordering::SeqCst);
        Err(WorkError::failed("ack lost"))
    })
    .with_completion(move || Ok(check_done.load(Ordering::SeqCst)))
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2));

    let mut node = ActionNode::new("lost_ack", work);
    node.setup().unwrap();

    assert_eq!(node.tick(&mut TickContext::new(0)), Status::Running);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(node.worker_status(), Status::Success);
    assert_eq!(node.tick(&mut TickContext::new(1)), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    node.shutdown();
}

#[test]
fn final_check_overrules_a_timeout() {
    let timeout = Duration::from_millis(100);
    let steps = Arc::new(AtomicUsize::new(0));
    let step_count = steps.clone();
    let first_check: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    // Completion only becomes observable once the cycle timer has run out.
    let work = ActionWork::new(move || {
        step_count.fetch_add(1, Ordering::SeqCst);
        Ok(Status::Running)
    })
    .with_completion(move || {
        let started = *first_check.lock().unwrap().get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        if elapsed < timeout {
            thread::sleep(timeout - elapsed + Duration::from_millis(10));
            return Ok(false);
        }
        Ok(true)
    })
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(timeout);

    let mut node = ActionNode::new("slow_readback", work);
    node.setup().unwrap();

    assert_eq!(node.tick(&mut TickContext::new(0)), Status::Running);
    thread::sleep(Duration::from_millis(400));
    assert_eq!(node.worker_status(), Status::Success);
    assert_eq!(node.tick(&mut TickContext::new(1)), Status::Success);
    // The loop left through the timer, never through a step.
    assert_eq!(steps.load(Ordering::SeqCst), 0);
    node.shutdown();
}

#[test]
fn panicking_step_is_contained() {
    let calls = Arc::new(AtomicUsize::new(0));
    let step_calls = calls.clone();
    let work = ActionWork::new(move || {
        if step_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("driver bug");
        }
        Ok(Status::Success)
    })
    .with_completion({
        let calls = calls.clone();
        move || Ok(calls.load(Ordering::SeqCst) >= 2)
    })
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2));

    let mut node = ActionNode::new("panicky", work);
    node.setup().unwrap();

    assert_eq!(tick_until_resolved(&mut node, Duration::from_secs(3)), Status::Failure);
    assert_eq!(tick_until_resolved(&mut node, Duration::from_secs(3)), Status::Success);
    node.shutdown();
}

#[test]
fn worker_idles_until_the_gate_is_signalled() {
    let calls = Arc::new(AtomicUsize::new(0));
    let step_calls = calls.clone();
    let work = ActionWork::new(move || {
        step_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Status::Running)
    });
    let mut node = ActionNode::new("idle", work);
    node.setup().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(node.worker_status(), Status::Invalid);
    node.shutdown();
}

#[test]
fn setup_and_shutdown_are_idempotent() {
    let mut node = ActionNode::new("twice", ActionWork::new(|| Ok(Status::Running)));
    node.setup().unwrap();
    node.setup().unwrap();
    assert!(node.is_set_up());

    node.shutdown();
    node.shutdown();
    assert!(!node.is_set_up());
}

#[test]
fn superseded_attempt_cannot_overwrite_newer_status() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let (step_entered, step_release, check_release) =
        (entered.clone(), release.clone(), release.clone());
    let work = ActionWork::new(move || {
        step_entered.store(true, Ordering::SeqCst);
        while !step_release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        Ok(Status::Running)
    })
    .with_completion(move || Ok(check_release.load(Ordering::SeqCst)))
    .with_loop_period(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(2));

    let cell = StatusCell::new();
    let gate = WorkGate::new();
    let mut worker = Worker::new("fenced", work.into_worker_body("fenced", cell.clone(), gate.clone()));
    worker.start().unwrap();

    cell.begin_attempt();
    gate.set();
    while !entered.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(2));
    }

    // A newer attempt opens while the old cycle is still inside its step.
    cell.begin_attempt();
    release.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));

    assert_eq!(cell.get(), Status::Running);
    worker.stop().unwrap();
}
