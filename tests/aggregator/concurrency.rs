use std::sync::Arc;
use std::thread;

use rand::Rng;

use moquag::{FlushStatus, Operation, ResultCounter, StorageBackend, TargetKey};

use crate::memory_aggregator;

#[test]
fn concurrent_appends_are_never_lost() {
    const THREADS: i32 = 8;
    const OPS: i32 = 250;

    let (aggregator, backend) = memory_aggregator(0.01, 7);
    let aggregator = Arc::new(aggregator);
    aggregator.start().unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let aggregator = aggregator.clone();
            thread::spawn(move || {
                let target = aggregator.resolve("load", "writes").unwrap();
                for i in 0..OPS {
                    target.insert(doc! { "_id": t * OPS + i, "thread": t }).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    aggregator.close().unwrap();

    let expected = (THREADS * OPS) as usize;
    let key = TargetKey::new("load", "writes");
    assert_eq!(expected, backend.count(&key).unwrap());

    let counter = aggregator.results_for("load", "writes").unwrap().unwrap();
    assert_eq!(expected as u64, counter.inserted);
    assert_eq!(0, counter.write_errors);

    let sent: usize = backend.requests().unwrap().iter().map(|r| r.operations).sum();
    assert_eq!(expected, sent);
}

#[test]
fn concurrent_appends_across_targets() {
    let (aggregator, backend) = memory_aggregator(60.0, 5);
    let aggregator = Arc::new(aggregator);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let aggregator = aggregator.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let collection = format!("c{}", i % 3);
                    aggregator
                        .resolve(&format!("db{}", t % 2), &collection)
                        .unwrap()
                        .insert(doc! { "t": t, "i": i })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(FlushStatus::Completed, aggregator.flush_all().unwrap());
    assert_eq!(0, aggregator.pending_operations().unwrap());
    assert_eq!(200, aggregator.total_results().unwrap().inserted);

    let stored: usize = aggregator
        .results()
        .unwrap()
        .keys()
        .map(|key| backend.count(key).unwrap())
        .sum();
    assert_eq!(200, stored);
}

fn random_operations(n: i32) -> Vec<Operation> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            let k = rng.gen_range(0, 5);
            match rng.gen_range(0, 4) {
                0 => Operation::Insert { document: doc! { "_id": i, "k": k } },
                1 => Operation::Update {
                    filter: doc! { "k": k },
                    update: doc! { "$inc": { "n": 1 } },
                    upsert: false,
                    multi: true,
                },
                2 => Operation::Upsert {
                    filter: doc! { "k": k },
                    update: doc! { "$set": { "seen": true } },
                },
                _ => Operation::Remove {
                    filter: doc! { "_id": rng.gen_range(0, n) },
                    multi: false,
                },
            }
        })
        .collect()
}

#[test]
fn merged_results_do_not_depend_on_batching() {
    let operations = random_operations(200);
    let key = TargetKey::new("app", "mixed");

    let reference = moquag::MemoryBackend::new();
    let result = reference.execute_bulk(&key, &operations, true).unwrap();
    let expected = ResultCounter::from(&result);

    for &max_ops in &[1, 3, 7, 1000] {
        let (aggregator, backend) = memory_aggregator(60.0, max_ops);
        let target = aggregator.resolve("app", "mixed").unwrap();
        for operation in operations.iter().cloned() {
            target.append(operation).unwrap();
        }
        aggregator.flush_all().unwrap();

        assert_eq!(expected, aggregator.results_for("app", "mixed").unwrap().unwrap());
        assert_eq!(
            reference.count(&key).unwrap(),
            backend.count(&key).unwrap(),
            "batch size {}",
            max_ops
        );
    }
}
