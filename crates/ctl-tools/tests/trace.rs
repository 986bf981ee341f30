use std::sync::{Arc, Mutex};
use std::thread;

use ctl_core::Status;
use ctl_tools::{TraceCollector, TraceEvent, TraceHandle, TraceSink};

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<TraceEvent>>>);

impl TraceSink for SharedSink {
    fn emit(&mut self, event: TraceEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn events_reach_the_sink_only_on_flush() {
    let sink = SharedSink::default();
    let shared = sink.0.clone();
    let mut collector = TraceCollector::new(Box::new(sink));
    collector.open();

    let handle = collector.handle();
    handle.emit(TraceEvent::new("move_magnet", "cycle.start").with_status(Status::Running));
    assert!(shared.lock().unwrap().is_empty());

    assert_eq!(collector.flush(), 1);
    let events = shared.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node, "move_magnet");
    assert_eq!(events[0].tag, "cycle.start");
    assert_eq!(events[0].status, Some(Status::Running));
}

#[test]
fn handles_emit_from_worker_threads() {
    let sink = SharedSink::default();
    let shared = sink.0.clone();
    let mut collector = TraceCollector::new(Box::new(sink));
    collector.open();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let handle = collector.handle();
            thread::spawn(move || {
                handle.emit(TraceEvent::new(format!("node{i}"), "step").with_detail("ok"));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(collector.flush(), 4);
    assert_eq!(shared.lock().unwrap().len(), 4);
}

#[test]
fn closed_collector_drops_new_events_but_drains_queued_ones() {
    let sink = SharedSink::default();
    let shared = sink.0.clone();
    let mut collector = TraceCollector::new(Box::new(sink));

    let handle = collector.handle();
    handle.emit(TraceEvent::new("early", "ignored"));
    assert_eq!(collector.flush(), 0);

    collector.open();
    handle.emit(TraceEvent::new("queued", "kept"));
    assert_eq!(collector.close(), 1);

    handle.emit(TraceEvent::new("late", "ignored"));
    assert_eq!(collector.flush(), 0);
    assert_eq!(shared.lock().unwrap().len(), 1);
}

#[test]
fn disconnected_handle_is_inert() {
    let handle = TraceHandle::disconnected();
    handle.emit(TraceEvent::new("nowhere", "noop"));
}
