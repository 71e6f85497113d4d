use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use moquag::bulk::error::{BulkWriteError, WriteConcernError};
use moquag::{FlushEvent, Listener, ResultCounter, TargetKey};

use crate::memory_aggregator;

#[test]
fn hooks_observe_flush_lifecycle() {
    let (aggregator, _backend) = memory_aggregator(60.0, 2);
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = names.clone();
    aggregator
        .add_hook(Box::new(move |event: &FlushEvent| {
            sink.lock().unwrap().push(event.name());
        }))
        .unwrap();

    let users = aggregator.resolve("app", "users").unwrap();
    users.insert(doc! { "i": 1 }).unwrap();
    users.insert(doc! { "i": 2 }).unwrap();
    users.insert(doc! { "i": 3 }).unwrap();
    aggregator.flush_all().unwrap();

    assert_eq!(
        vec![
            "threshold-triggered",
            "flush-started",
            "flush-result",
            "flush-started",
            "flush-result",
        ],
        *names.lock().unwrap()
    );
}

#[test]
fn every_hook_runs() {
    let listener = Listener::new();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let count = count.clone();
        listener
            .add_hook(Box::new(move |_: &FlushEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }

    listener.emit(FlushEvent::FlushStarted {
        target: TargetKey::new("a", "b"),
        operations: 1,
        at: Utc::now(),
    });
    assert_eq!(3, count.load(Ordering::SeqCst));
}

#[test]
fn event_display() {
    let target = TargetKey::new("app", "users");

    let started = FlushEvent::FlushStarted { target: target.clone(), operations: 4, at: Utc::now() };
    assert_eq!("FLUSH.app.users STARTED: 4 operations", format!("{}", started));
    assert!(!started.is_failure());
    assert_eq!(&target, started.target());

    let succeeded = FlushEvent::FlushSucceeded {
        target: target.clone(),
        counter: ResultCounter { inserted: 4, ..ResultCounter::default() },
        duration: Duration::from_millis(12),
        at: Utc::now(),
    };
    assert!(format!("{}", succeeded).starts_with("FLUSH.app.users COMPLETED:"));
    assert!(format!("{}", succeeded).ends_with("(12 ms)"));

    let lost = FlushEvent::BackendError {
        target: target.clone(),
        operations_lost: 3,
        message: "no reachable server".to_owned(),
        at: Utc::now(),
    };
    assert_eq!(
        "FLUSH.app.users FAILURE: no reachable server (3 operations lost)",
        format!("{}", lost)
    );
    assert!(lost.is_failure());

    let partial = FlushEvent::WriteErrors {
        target,
        write_errors: vec![BulkWriteError::new(1, 11000, "dup", None)],
        write_concern_errors: vec![WriteConcernError::new(64, "slow")],
        at: Utc::now(),
    };
    assert_eq!(
        "FLUSH.app.users WRITE ERRORS:\n\tBulkWriteError at index 1 (code 11000): dup\
         \n\tWriteConcernError (code 64): slow",
        format!("{}", partial)
    );
}
