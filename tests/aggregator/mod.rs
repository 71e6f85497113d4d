mod concurrency;

use std::thread;
use std::time::Duration;

use moquag::{FlushStatus, Operation, ResultCounter, TargetKey};

use crate::memory_aggregator;

#[test]
fn threshold_flushes_on_the_appending_thread() {
    let (aggregator, backend) = memory_aggregator(60.0, 5);
    let users = aggregator.resolve("app", "users").unwrap();

    for i in 0..6 {
        users.insert(doc! { "_id": i, "name": format!("user-{}", i) }).unwrap();
    }

    let key = TargetKey::new("app", "users");
    assert_eq!(5, backend.count(&key).unwrap());
    assert_eq!(1, users.pending_operations());

    let counter = aggregator.results_for("app", "users").unwrap().unwrap();
    assert_eq!(5, counter.inserted);

    let requests = backend.requests().unwrap();
    assert_eq!(1, requests.len());
    assert_eq!(5, requests[0].operations);
    assert_eq!(key, requests[0].target);
}

#[test]
fn threshold_then_manual_flush_sends_the_remainder() {
    let (aggregator, backend) = memory_aggregator(60.0, 5);
    let users = aggregator.resolve("app", "users").unwrap();

    for i in 0..6 {
        users.insert(doc! { "_id": i }).unwrap();
    }

    assert_eq!(FlushStatus::Completed, aggregator.flush_all().unwrap());

    let key = TargetKey::new("app", "users");
    assert_eq!(6, backend.count(&key).unwrap());
    assert_eq!(6, aggregator.results_for("app", "users").unwrap().unwrap().inserted);

    let sizes: Vec<usize> = backend.requests().unwrap().iter().map(|r| r.operations).collect();
    assert_eq!(vec![5, 1], sizes);
}

#[test]
fn timer_flushes_pending_operations() {
    let (aggregator, backend) = memory_aggregator(0.1, 100);
    assert!(aggregator.start().unwrap());

    let events = aggregator.resolve("app", "events").unwrap();
    for i in 0..3 {
        events.insert(doc! { "seq": i }).unwrap();
    }

    thread::sleep(Duration::from_millis(400));

    let key = TargetKey::new("app", "events");
    assert_eq!(3, backend.count(&key).unwrap());
    assert_eq!(3, aggregator.results_for("app", "events").unwrap().unwrap().inserted);
    assert!(aggregator.ticks() >= 1);
    assert_eq!(0, aggregator.pending_operations().unwrap());

    assert!(aggregator.stop().unwrap());
    assert!(!aggregator.is_running());
}

#[test]
fn timer_sends_each_operation_on_the_next_tick() {
    let (aggregator, backend) = memory_aggregator(0.1, 100);
    let key = TargetKey::new("app", "ticks");
    let ticks = aggregator.resolve("app", "ticks").unwrap();

    assert!(aggregator.start().unwrap());
    ticks.insert(doc! { "_id": "A" }).unwrap();
    assert_eq!(0, backend.count(&key).unwrap());

    thread::sleep(Duration::from_millis(150));
    ticks.insert(doc! { "_id": "B" }).unwrap();
    assert_eq!(vec![doc! { "_id": "A" }], backend.documents(&key).unwrap());
    assert_eq!(1, ticks.pending_operations());

    thread::sleep(Duration::from_millis(250));
    assert_eq!(
        vec![doc! { "_id": "A" }, doc! { "_id": "B" }],
        backend.documents(&key).unwrap()
    );
    aggregator.stop().unwrap();
}

#[test]
fn interval_beyond_the_clock_leaves_manual_flushing() {
    let (aggregator, backend) = memory_aggregator(1e19, 10);
    assert!(aggregator.start().unwrap());

    let users = aggregator.resolve("app", "users").unwrap();
    users.insert(doc! { "_id": 1 }).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(aggregator.is_running());
    assert_eq!(0, aggregator.ticks());
    assert_eq!(1, users.pending_operations());

    aggregator.close().unwrap();
    assert!(!aggregator.is_running());
    assert_eq!(1, backend.count(&TargetKey::new("app", "users")).unwrap());
}

#[test]
fn empty_flush_is_a_no_op() {
    let (aggregator, backend) = memory_aggregator(60.0, 10);

    assert_eq!(FlushStatus::Completed, aggregator.flush_all().unwrap());
    assert!(aggregator.results().unwrap().is_empty());
    assert!(backend.requests().unwrap().is_empty());
    assert!(!aggregator.is_connected());

    aggregator.resolve("app", "users").unwrap();
    assert_eq!(FlushStatus::Completed, aggregator.flush_all().unwrap());
    assert!(aggregator.results().unwrap().is_empty());
    assert!(backend.requests().unwrap().is_empty());
}

#[test]
fn repeated_flush_does_not_change_results() {
    let (aggregator, _backend) = memory_aggregator(60.0, 10);
    let users = aggregator.resolve("app", "users").unwrap();
    users.insert(doc! { "name": "a" }).unwrap();

    aggregator.flush_all().unwrap();
    let first = aggregator.results().unwrap();
    aggregator.flush_all().unwrap();
    assert_eq!(first, aggregator.results().unwrap());
}

#[test]
fn targets_are_isolated() {
    let (aggregator, backend) = memory_aggregator(60.0, 3);
    let x = aggregator.resolve("a", "x").unwrap();
    let y = aggregator.resolve("a", "y").unwrap();
    let z = aggregator.resolve("b", "x").unwrap();

    for i in 0..3 {
        x.insert(doc! { "i": i }).unwrap();
    }
    y.insert(doc! { "i": 0 }).unwrap();
    y.insert(doc! { "i": 1 }).unwrap();
    z.insert(doc! { "i": 0 }).unwrap();

    assert_eq!(3, backend.count(&TargetKey::new("a", "x")).unwrap());
    assert_eq!(0, backend.count(&TargetKey::new("a", "y")).unwrap());
    assert_eq!(0, backend.count(&TargetKey::new("b", "x")).unwrap());
    assert_eq!(None, aggregator.results_for("a", "y").unwrap());
    assert_eq!(2, y.pending_operations());
    assert_eq!(1, z.pending_operations());

    aggregator.flush_all().unwrap();
    let results = aggregator.results().unwrap();
    assert_eq!(3, results.len());
    assert_eq!(3, results[&TargetKey::new("a", "x")].inserted);
    assert_eq!(2, results[&TargetKey::new("a", "y")].inserted);
    assert_eq!(1, results[&TargetKey::new("b", "x")].inserted);
    assert_eq!(vec!["a".to_owned(), "b".to_owned()], aggregator.database_names().unwrap());
}

#[test]
fn flush_one_target() {
    let (aggregator, backend) = memory_aggregator(60.0, 10);
    let x = aggregator.resolve("a", "x").unwrap();
    let y = aggregator.resolve("a", "y").unwrap();
    x.insert(doc! { "i": 1 }).unwrap();
    y.insert(doc! { "i": 1 }).unwrap();

    aggregator.flush("a", "x").unwrap();
    assert_eq!(1, backend.count(&TargetKey::new("a", "x")).unwrap());
    assert_eq!(0, backend.count(&TargetKey::new("a", "y")).unwrap());
    assert_eq!(1, aggregator.pending_operations().unwrap());

    y.flush().unwrap();
    assert_eq!(1, backend.count(&TargetKey::new("a", "y")).unwrap());

    // Unknown targets flush nothing.
    aggregator.flush("nope", "x").unwrap();
}

#[test]
fn get_and_reset_results() {
    let (aggregator, _backend) = memory_aggregator(60.0, 10);
    let users = aggregator.resolve("app", "users").unwrap();
    users.insert(doc! { "name": "a" }).unwrap();
    aggregator.flush_all().unwrap();

    let taken = aggregator.get_and_reset_results().unwrap();
    assert_eq!(1, taken[&TargetKey::new("app", "users")].inserted);
    assert!(aggregator.results().unwrap().is_empty());

    users.insert(doc! { "name": "b" }).unwrap();
    aggregator.flush_all().unwrap();
    assert_eq!(1, aggregator.total_results().unwrap().inserted);
}

#[test]
fn fluent_find_operations() {
    let (aggregator, backend) = memory_aggregator(60.0, 100);
    let people = aggregator.resolve("app", "people").unwrap();

    people.insert(doc! { "_id": 1, "name": "ada", "visits": 1 }).unwrap();
    people.insert(doc! { "_id": 2, "name": "alan", "visits": 1 }).unwrap();
    people.find(doc! { "name": "ada" }).update_one(doc! { "$inc": { "visits": 1 } }).unwrap();
    people.find(doc! {}).update(doc! { "$set": { "active": true } }).unwrap();
    people
        .find(doc! { "name": "grace" })
        .upsert()
        .replace_one(doc! { "name": "grace", "visits": 0 })
        .unwrap();
    people.find(doc! { "name": "alan" }).remove_one().unwrap();
    people.upsert(doc! { "name": "linus" }, doc! { "$set": { "visits": 3 } }).unwrap();
    assert_eq!(7, people.pending_operations());

    aggregator.flush_all().unwrap();

    let counter = aggregator.results_for("app", "people").unwrap().unwrap();
    let expected = ResultCounter {
        inserted: 2,
        matched: 3,
        modified: 3,
        upserted: 2,
        removed: 1,
        ..ResultCounter::default()
    };
    assert_eq!(expected, counter);

    let docs = backend.documents(&TargetKey::new("app", "people")).unwrap();
    assert_eq!(3, docs.len());
    assert_eq!(Some(&bson::Bson::I32(2)), docs[0].get("visits"));
    assert_eq!(Some(&bson::Bson::Boolean(true)), docs[0].get("active"));
}

#[test]
fn invalid_operations_are_rejected_before_buffering() {
    let (aggregator, _backend) = memory_aggregator(60.0, 10);
    let users = aggregator.resolve("app", "users").unwrap();

    assert!(users.update(doc! { "a": 1 }, doc! { "b": 2 }, false).is_err());
    assert!(users.find(doc! {}).replace_one(doc! { "$set": { "b": 2 } }).is_err());
    assert!(users.insert(doc! { "$bad": 1 }).is_err());
    assert!(users
        .append(Operation::Upsert { filter: doc! {}, update: doc! {} })
        .is_err());
    assert_eq!(0, users.pending_operations());

    assert!(aggregator.resolve("", "users").is_err());
    assert!(aggregator.resolve("app", "us$ers").is_err());
}

#[test]
fn close_flushes_and_stops() {
    let (aggregator, backend) = memory_aggregator(0.05, 100);
    aggregator.start().unwrap();

    let logs = aggregator.resolve("app", "logs").unwrap();
    logs.insert(doc! { "line": 1 }).unwrap();
    aggregator.close().unwrap();

    assert!(aggregator.is_closed());
    assert!(!aggregator.is_running());
    assert_eq!(1, backend.count(&TargetKey::new("app", "logs")).unwrap());

    // Still usable manually after close.
    logs.insert(doc! { "line": 2 }).unwrap();
    aggregator.flush_all().unwrap();
    assert_eq!(2, backend.count(&TargetKey::new("app", "logs")).unwrap());
}

#[test]
fn drop_flushes_pending_operations() {
    let (aggregator, backend) = memory_aggregator(60.0, 100);
    aggregator.resolve("app", "logs").unwrap().insert(doc! { "line": 1 }).unwrap();
    drop(aggregator);

    assert_eq!(1, backend.count(&TargetKey::new("app", "logs")).unwrap());
}

#[test]
fn display_shows_the_interval() {
    let (aggregator, _backend) = memory_aggregator(0.5, 10);
    assert_eq!("{\"seconds\": 0.5}", format!("{}", aggregator));
}
