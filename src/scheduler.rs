//! Self-rescheduling periodic timer that drives timed flushes.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, trace, warn};

use crate::Result;

type Callback = Arc<dyn Fn() + Send + Sync>;

// Cancellation handle for one armed timer thread.
struct TimerSignal {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl TimerSignal {
    fn new() -> TimerSignal {
        TimerSignal {
            cancelled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn cancel(&self) {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            *cancelled = true;
        }
        self.condvar.notify_all();
    }

    // Blocks until `deadline`, or until cancelled when there is none.
    // Returns false if the timer was cancelled first.
    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut cancelled = match self.cancelled.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        loop {
            if *cancelled {
                return false;
            }

            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    match self.condvar.wait_timeout(cancelled, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(_) => return false,
                    }
                }
                None => match self.condvar.wait(cancelled) {
                    Ok(guard) => guard,
                    Err(_) => return false,
                },
            };
        }
    }
}

/// Invokes a callback every `interval` on a background thread.
///
/// Each firing re-arms the timer before running the callback, so the next
/// tick is scheduled even if the callback is slow or panics. Stopping
/// cancels future firings only; a callback already running is not waited for.
pub struct Scheduler {
    interval: Duration,
    callback: Callback,
    armed: Mutex<Option<Arc<TimerSignal>>>,
    ticks: Arc<AtomicUsize>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Scheduler {
    /// Creates an idle scheduler. Nothing runs until `start` is called.
    pub fn new<F>(interval: Duration, callback: F) -> Scheduler
    where
        F: Fn() + Send + Sync + 'static,
    {
        Scheduler {
            interval,
            callback: Arc::new(callback),
            armed: Mutex::new(None),
            ticks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.armed.lock().map(|armed| armed.is_some()).unwrap_or(false)
    }

    /// Number of times the timer has fired since creation.
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Arms the timer. Returns `false` without doing anything if it is
    /// already running.
    pub fn start(&self) -> Result<bool> {
        let mut armed = self.armed.lock()?;
        if armed.is_some() {
            info!("Already started; looping every {:?}", self.interval);
            return Ok(false);
        }

        let signal = Arc::new(TimerSignal::new());
        let thread_signal = signal.clone();
        let interval = self.interval;
        let callback = self.callback.clone();
        let ticks = self.ticks.clone();

        thread::Builder::new()
            .name("moquag-flush-timer".to_owned())
            .spawn(move || Scheduler::run(&thread_signal, interval, &callback, &ticks))?;

        *armed = Some(signal);
        info!("Starting flush loop; looping every {:?}", self.interval);
        Ok(true)
    }

    /// Cancels the armed timer. Returns `false` if it was not running.
    pub fn stop(&self) -> Result<bool> {
        match self.armed.lock()?.take() {
            Some(signal) => {
                signal.cancel();
                info!("Stopping flush loop");
                Ok(true)
            }
            None => {
                info!("Flush loop not started");
                Ok(false)
            }
        }
    }

    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        self.start()?;
        Ok(())
    }

    // An interval too large to add to the clock never fires.
    fn next_deadline(interval: Duration) -> Option<Instant> {
        let deadline = Instant::now().checked_add(interval);
        if deadline.is_none() {
            warn!("Flush interval {:?} is beyond the clock's range; timer will not fire", interval);
        }
        deadline
    }

    fn run(signal: &TimerSignal, interval: Duration, callback: &Callback, ticks: &AtomicUsize) {
        let mut deadline = Scheduler::next_deadline(interval);

        while signal.wait_until(deadline) {
            // Re-armed before the callback runs.
            deadline = Scheduler::next_deadline(interval);
            ticks.fetch_add(1, Ordering::SeqCst);
            trace!("Flush timer fired");

            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!("Flush callback panicked; the timer stays armed");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut armed) = self.armed.lock() {
            if let Some(signal) = armed.take() {
                signal.cancel();
            }
        }
    }
}
