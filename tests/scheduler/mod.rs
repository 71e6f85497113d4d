use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use moquag::scheduler::Scheduler;

fn counting_scheduler(interval_ms: u64) -> (Scheduler, Arc<AtomicUsize>) {
    crate::init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let scheduler = Scheduler::new(Duration::from_millis(interval_ms), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (scheduler, calls)
}

#[test]
fn fires_repeatedly_until_stopped() {
    let (scheduler, calls) = counting_scheduler(20);
    assert!(!scheduler.is_running());
    assert!(scheduler.start().unwrap());
    assert!(scheduler.is_running());

    thread::sleep(Duration::from_millis(200));
    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert!(scheduler.ticks() >= 3);

    assert!(scheduler.stop().unwrap());
    assert!(!scheduler.is_running());
    thread::sleep(Duration::from_millis(40));
    let stopped_at = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(stopped_at, calls.load(Ordering::SeqCst));
}

#[test]
fn start_and_stop_are_idempotent() {
    let (scheduler, calls) = counting_scheduler(30);

    assert!(!scheduler.stop().unwrap());
    assert!(scheduler.start().unwrap());
    assert!(!scheduler.start().unwrap());

    thread::sleep(Duration::from_millis(100));
    assert!(scheduler.stop().unwrap());
    assert!(!scheduler.stop().unwrap());

    // A second start would have doubled the firing rate.
    assert!(calls.load(Ordering::SeqCst) <= 4);
}

#[test]
fn restart_rearms_the_timer() {
    let (scheduler, calls) = counting_scheduler(20);
    scheduler.restart().unwrap();
    assert!(scheduler.is_running());

    scheduler.stop().unwrap();
    thread::sleep(Duration::from_millis(40));
    let before = calls.load(Ordering::SeqCst);

    scheduler.restart().unwrap();
    thread::sleep(Duration::from_millis(120));
    assert!(calls.load(Ordering::SeqCst) > before);
    assert_eq!(Duration::from_millis(20), scheduler.interval());
}

#[test]
fn survives_a_panicking_callback() {
    crate::init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let scheduler = Scheduler::new(Duration::from_millis(20), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        panic!("flush exploded");
    });

    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(200));

    assert!(calls.load(Ordering::SeqCst) >= 2);
    assert!(scheduler.is_running());
    scheduler.stop().unwrap();
}

#[test]
fn slow_callback_does_not_block_stop() {
    let scheduler = Scheduler::new(Duration::from_millis(10), || {
        thread::sleep(Duration::from_millis(300));
    });
    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    // The running callback is not waited for.
    let start = std::time::Instant::now();
    scheduler.stop().unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[test]
fn interval_beyond_the_clock_never_fires() {
    crate::init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let scheduler = Scheduler::new(Duration::from_secs(u64::MAX), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(scheduler.start().unwrap());
    thread::sleep(Duration::from_millis(100));
    assert!(scheduler.is_running());
    assert_eq!(0, scheduler.ticks());
    assert_eq!(0, calls.load(Ordering::SeqCst));

    scheduler.restart().unwrap();
    assert!(scheduler.is_running());
    assert!(scheduler.stop().unwrap());
    assert!(!scheduler.is_running());
}
