use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ctl_bt::{ActionNode, ActionWork, BtNode, CheckAndDo, Condition, Status, TreeTicker};

fn counter_idiom(counter: Arc<AtomicI64>, steps: Arc<AtomicUsize>) -> CheckAndDo {
    let check_counter = counter.clone();
    let check = Condition::new("counter_at_100", move || {
        check_counter.load(Ordering::SeqCst) >= 100
    });

    let step_counter = counter.clone();
    let done_counter = counter;
    let work = ActionWork::new(move || {
        steps.fetch_add(1, Ordering::SeqCst);
        step_counter.fetch_add(10, Ordering::SeqCst);
        Ok(Status::Running)
    })
    .with_completion(move || Ok(done_counter.load(Ordering::SeqCst) >= 100))
    .with_loop_period(Duration::from_millis(10))
    .with_timeout(Duration::from_secs(5));

    CheckAndDo::new(
        "raise_counter",
        Box::new(check),
        ActionNode::new("add_ten", work),
    )
}

#[test]
fn drives_counter_to_goal_and_stops() {
    let counter = Arc::new(AtomicI64::new(0));
    let steps = Arc::new(AtomicUsize::new(0));
    let mut ticker = TreeTicker::new(Box::new(counter_idiom(counter.clone(), steps.clone())));
    ticker.setup().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut status = Status::Invalid;
    while Instant::now() < deadline {
        status = ticker.tick();
        assert!(counter.load(Ordering::SeqCst) <= 100);
        if status == Status::Success {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(status, Status::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(steps.load(Ordering::SeqCst), 10);

    // Keep ticking: the goal holds, so the action is never started again.
    for _ in 0..5 {
        assert_eq!(ticker.tick(), Status::Success);
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(steps.load(Ordering::SeqCst), 10);
    ticker.shutdown();
}

#[test]
fn action_is_not_ticked_while_goal_already_holds() {
    let counter = Arc::new(AtomicI64::new(100));
    let steps = Arc::new(AtomicUsize::new(0));
    let mut ticker = TreeTicker::new(Box::new(counter_idiom(counter.clone(), steps.clone())));
    ticker.setup().unwrap();

    for _ in 0..3 {
        assert_eq!(ticker.tick(), Status::Success);
        let snapshot = ticker.last_snapshot().unwrap();
        assert!(snapshot.visited.iter().any(|v| v.name == "counter_at_100"));
        assert!(!snapshot.visited.iter().any(|v| v.name == "add_ten"));
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(steps.load(Ordering::SeqCst), 0);

    let report = ticker.report();
    assert_eq!(report.message, "Goal already met");
    assert_eq!(report.find("add_ten").unwrap().status, Status::Invalid);
    ticker.shutdown();
}

#[test]
fn exposes_check_then_action_as_children() {
    let idiom = counter_idiom(Arc::new(AtomicI64::new(0)), Arc::new(AtomicUsize::new(0)));
    let names: Vec<_> = idiom.children().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["counter_at_100", "add_ten"]);
    assert_eq!(idiom.check().name(), "counter_at_100");
    assert_eq!(idiom.action().name(), "add_ten");
}
